//! `delta` — run an agent on a task.
//!
//! Exit codes are part of the external contract: 0 for COMPLETED,
//! 101 for the async ask-human pause (WAITING_FOR_INPUT), any other
//! non-zero for failure.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use delta_config::LlmEnv;
use delta_engine::{Engine, EngineOptions, RunPaths};
use delta_provider_openai::OpenAiProvider;
use delta_types::ProviderError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "delta", version, about = "Host runtime for command-line agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a run, or resume an existing one by run id.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Agent root directory (contains agent.yaml and context.yaml).
    #[arg(long)]
    agent: PathBuf,

    /// The task to hand the agent.
    #[arg(long)]
    task: String,

    /// Working directory for the run. Defaults to the current directory.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Run id to create or resume. Generated when absent.
    #[arg(long)]
    run_id: Option<String>,

    /// Answer ask_human inline instead of pausing with exit code 101.
    #[arg(short, long)]
    interactive: bool,

    /// Allow recovery of a run recorded on another host.
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => run(args).await,
    };
    std::process::exit(code);
}

async fn run(args: RunArgs) -> i32 {
    let workspace = match args.work_dir {
        Some(dir) => dir,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("delta: cannot determine working directory: {e}");
                return 1;
            }
        },
    };
    let agent_home = match args.agent.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("delta: agent directory {}: {e}", args.agent.display());
            return 1;
        }
    };

    let run_id = args.run_id.unwrap_or_else(delta_journal::new_token);
    let paths = RunPaths::new(&workspace, &run_id);
    if let Err(e) = std::fs::create_dir_all(paths.run_dir()) {
        eprintln!("delta: cannot create run directory: {e}");
        return 1;
    }
    if let Err(e) = init_tracing(&paths) {
        eprintln!("delta: cannot open engine.log: {e}");
        return 1;
    }

    let config = match delta_config::load_agent_config(&agent_home) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("delta: {e}");
            return 1;
        }
    };
    let manifest = match delta_config::load_context_manifest(&agent_home) {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("delta: {e}");
            return 1;
        }
    };

    let env = LlmEnv::resolve(&workspace, &agent_home);
    let Some(api_key) = env.api_key else {
        eprintln!("delta: {}", ProviderError::MissingApiKey);
        return 1;
    };
    let mut provider = OpenAiProvider::new(api_key);
    if let Some(base_url) = env.base_url {
        provider = provider.with_url(base_url);
    }

    let options = EngineOptions {
        workspace,
        agent_home,
        task: args.task,
        run_id: Some(run_id),
        interactive: args.interactive,
        force: args.force,
    };
    let mut engine = match Engine::load(options, config, manifest, Arc::new(provider)).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("delta: {e}");
            return 1;
        }
    };

    tracing::info!(run_id = engine.run_id(), "run starting");
    match engine.run().await {
        Ok(outcome) => {
            if let Some(response) = &outcome.final_response {
                println!("{response}");
            }
            outcome.exit_code()
        }
        Err(e) => {
            eprintln!("delta: {e}");
            1
        }
    }
}

/// Trace to stderr (RUST_LOG-filtered) and, in full, to the run's
/// `engine.log`.
fn init_tracing(paths: &RunPaths) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.engine_log())?;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false),
        )
        .try_init()
        .map_err(std::io::Error::other)?;
    Ok(())
}
