//! The engine: run lifecycle and the Think→Act→Observe loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use delta_context::ContextBuilder;
use delta_hooks::{ControlAction, HookOutcome, HookRunner};
use delta_journal::{AuditStore, InvocationMeta, Journal, MetadataStore, ToolExecutionCapture};
use delta_tool::{ExecutionContext, ExecutionFailure};
use delta_types::{
    ActionStatus, AgentConfig, ChatRequest, ContextManifest, EngineError, EventPayload, HookPhase,
    JournalEvent, Provider, RunMetadata, RunStatus, SystemLevel, ToolInvocation, ToolSchema,
};

use crate::broker::{self, AskHumanArgs, ASK_HUMAN_TOOL};
use crate::janitor::{self, Triage};
use crate::paths::RunPaths;

/// Cap on observation text entering the journal. The full output always
/// stays in the audit store.
pub const OBSERVATION_CAP: usize = 5 * 1024;

const TRUNCATION_MARKER: &str = "... (truncated)";

/// How to start (or take over) a run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// The run's working directory; `.delta/` lives inside it.
    pub workspace: PathBuf,
    /// The agent root directory.
    pub agent_home: PathBuf,
    /// The task for a new run. Ignored on resume (the journal has it).
    pub task: String,
    /// Caller-supplied run id; generated when absent.
    pub run_id: Option<String>,
    /// Interactive `ask_human` (inline prompt) vs. async (pause + 101).
    pub interactive: bool,
    /// Allow the janitor to recover a run recorded on another host.
    pub force: bool,
}

/// How a call to [`Engine::run`] ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The run this outcome belongs to.
    pub run_id: String,
    /// Terminal (or paused) status.
    pub status: RunStatus,
    /// The model's final answer, when the run completed with one.
    pub final_response: Option<String>,
    /// Iterations completed over the run's whole life.
    pub iterations_completed: u32,
}

impl RunOutcome {
    /// The process exit code this outcome maps to (0 / 1 / 101).
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

enum IterationOutcome {
    Continue,
    Finished(Option<String>),
    Paused,
}

enum AskHumanFlow {
    Answered(String),
    Paused,
}

/// One run's executor. Owns the run directory and is the sole writer of
/// its journal and metadata for the duration of the process.
pub struct Engine {
    config: AgentConfig,
    context: ContextBuilder,
    provider: Arc<dyn Provider>,
    journal: Journal,
    metadata: MetadataStore,
    audit: AuditStore,
    hooks: HookRunner,
    paths: RunPaths,
    workspace: PathBuf,
    agent_home: PathBuf,
    run_id: String,
    task: String,
    interactive: bool,
    next_seq: u64,
    iterations_completed: u32,
}

impl Engine {
    /// Open a new or existing run.
    ///
    /// For an existing run the janitor triages first: a RUNNING run with
    /// a dead owner is patched to INTERRUPTED and taken over; a live
    /// owner or a cross-host record (without `force`) refuses; a run
    /// that already ended (COMPLETED / FAILED) refuses.
    pub async fn load(
        options: EngineOptions,
        config: AgentConfig,
        manifest: ContextManifest,
        provider: Arc<dyn Provider>,
    ) -> Result<Self, EngineError> {
        let run_id = options
            .run_id
            .clone()
            .unwrap_or_else(delta_journal::new_token);
        let paths = RunPaths::new(&options.workspace, &run_id);
        let metadata = MetadataStore::new(paths.run_dir());

        let iterations_completed = if metadata.exists().await {
            let existing = metadata.read().await?;
            match janitor::triage(&existing, options.force) {
                Triage::Refused(reason) => return Err(EngineError::ResumeRefused(reason)),
                Triage::Orphaned => {
                    tracing::info!(run_id, "recovering orphaned run as INTERRUPTED");
                    metadata
                        .update(|m| m.status = RunStatus::Interrupted)
                        .await?;
                }
                Triage::Clean(RunStatus::Completed | RunStatus::Failed) => {
                    return Err(EngineError::ResumeRefused(format!(
                        "run {run_id} already ended with status {:?}",
                        existing.status
                    )));
                }
                Triage::Clean(_) => {}
            }
            let updated = metadata
                .update(|m| {
                    m.status = RunStatus::Running;
                    m.pid = std::process::id();
                    m.hostname = janitor::local_hostname();
                    m.process_name = janitor::current_process_name();
                    m.end_time = None;
                })
                .await?;
            updated.iterations_completed
        } else {
            tokio::fs::create_dir_all(paths.run_dir()).await?;
            tokio::fs::create_dir_all(paths.context_artifacts()).await?;
            let now = chrono::Utc::now();
            // Metadata exists before the first journal write, always.
            metadata
                .initialize(&RunMetadata {
                    run_id: run_id.clone(),
                    start_time: now.to_rfc3339(),
                    start_time_unix: now.timestamp(),
                    end_time: None,
                    agent_ref: options.agent_home.display().to_string(),
                    task: options.task.clone(),
                    status: RunStatus::Running,
                    iterations_completed: 0,
                    pid: std::process::id(),
                    hostname: janitor::local_hostname(),
                    process_name: janitor::current_process_name(),
                    error: None,
                })
                .await?;
            0
        };

        let journal = Journal::open(&paths.journal()).await?;
        let next_seq = journal.last_seq_on_open() + 1;
        let hooks = HookRunner::new(
            run_id.clone(),
            paths.run_dir(),
            &options.workspace,
            config.lifecycle_hooks.clone(),
        );
        let context = ContextBuilder::new(
            manifest,
            &options.agent_home,
            &options.workspace,
            run_id.clone(),
        );
        let audit = AuditStore::new(paths.run_dir());

        Ok(Self {
            config,
            context,
            provider,
            journal,
            metadata,
            audit,
            hooks,
            paths,
            workspace: options.workspace,
            agent_home: options.agent_home,
            run_id,
            task: options.task,
            interactive: options.interactive,
            next_seq,
            iterations_completed,
        })
    }

    /// The run this engine owns.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The run directory layout.
    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Drive the loop until the run completes, fails, or pauses.
    pub async fn run(&mut self) -> Result<RunOutcome, EngineError> {
        let events = self.journal.read_all().await?;
        let has_start = events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::RunStart { .. }));
        if has_start {
            self.resolve_pending_interaction(&events).await?;
        } else {
            let task = self.task.clone();
            let agent_ref = self.agent_home.display().to_string();
            self.append(EventPayload::RunStart { task, agent_ref }).await?;
        }

        loop {
            match self.iterate().await {
                Ok(IterationOutcome::Continue) => {
                    if self.iterations_completed >= self.config.max_iterations {
                        tracing::info!(
                            run_id = %self.run_id,
                            max = self.config.max_iterations,
                            "iteration ceiling reached"
                        );
                        return self
                            .finish_completed(Some("Maximum iterations reached".into()))
                            .await;
                    }
                }
                Ok(IterationOutcome::Finished(final_response)) => {
                    return self.finish_completed(final_response).await;
                }
                Ok(IterationOutcome::Paused) => {
                    tracing::info!(run_id = %self.run_id, "paused for human input");
                    return Ok(RunOutcome {
                        run_id: self.run_id.clone(),
                        status: RunStatus::WaitingForInput,
                        final_response: None,
                        iterations_completed: self.iterations_completed,
                    });
                }
                Err(error) => return self.finish_failed(error).await,
            }
        }
    }

    /// One Think→Act→Observe cycle.
    async fn iterate(&mut self) -> Result<IterationOutcome, EngineError> {
        // Think: rebuild the model's input from disk.
        let events = self.journal.read_all().await?;
        let messages = self.context.build(&events).await?;
        let request = ChatRequest {
            model: self.config.llm.model.clone(),
            temperature: self.config.llm.temperature,
            max_tokens: self.config.llm.max_tokens,
            messages,
            tools: self.tool_schemas(),
        };
        let baseline =
            serde_json::to_value(&request).map_err(delta_types::JournalError::Serialization)?;

        let effective = match self.run_hook(HookPhase::PreLlmReq, &baseline).await? {
            Some(outcome) => outcome.final_payload.unwrap_or(baseline),
            None => baseline,
        };

        let invocation_id = delta_journal::new_token();
        self.audit
            .write_invocation_request(&invocation_id, &effective)
            .await;
        let started = chrono::Utc::now();
        let clock = Instant::now();
        let chat = self.provider.chat(&effective).await?;
        self.audit
            .write_invocation_response(
                &invocation_id,
                &chat.raw_response,
                &InvocationMeta {
                    start_time: started.to_rfc3339(),
                    end_time: chrono::Utc::now().to_rfc3339(),
                    model: self.config.llm.model.clone(),
                    duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
                    usage: chat.usage.clone(),
                },
            )
            .await;

        let message = chat.message;
        self.append(EventPayload::Thought {
            content: message.content.clone().unwrap_or_default(),
            llm_invocation_ref: invocation_id,
        })
        .await?;

        if message.tool_calls.is_empty() {
            return Ok(IterationOutcome::Finished(message.content));
        }

        self.run_hook(HookPhase::PostLlmResp, &chat.raw_response)
            .await?;

        // Act + Observe: execute the calls in the order the model
        // returned them, strictly sequentially.
        let mut counted_pair = false;
        for call in &message.tool_calls {
            if call.name == ASK_HUMAN_TOOL {
                if let AskHumanFlow::Paused = self.handle_ask_human(call).await? {
                    return Ok(IterationOutcome::Paused);
                }
                continue;
            }
            self.handle_tool_call(call, &mut counted_pair).await?;
        }

        if counted_pair {
            self.iterations_completed += 1;
            let n = self.iterations_completed;
            self.metadata.update(|m| m.iterations_completed = n).await?;
        }
        Ok(IterationOutcome::Continue)
    }

    async fn handle_tool_call(
        &mut self,
        call: &ToolInvocation,
        counted_pair: &mut bool,
    ) -> Result<(), EngineError> {
        let tool_def = self.config.tool(&call.name).cloned();
        let invocation = tool_def
            .as_ref()
            .map(|def| delta_tool::compose(def, &call.arguments, &self.agent_home));
        let resolved_command = match &invocation {
            Some(Ok(invocation)) => shell_words::join(invocation.argv.iter().map(String::as_str)),
            _ => call.name.clone(),
        };
        self.append(EventPayload::ActionRequest {
            action_id: call.id.clone(),
            tool_name: call.name.clone(),
            tool_args: call.arguments.clone(),
            resolved_command: resolved_command.clone(),
        })
        .await?;

        // The hook fires for every tool call, registered or not — a
        // policy hook gating tool use must see hallucinated names too.
        let hook_payload = serde_json::json!({
            "action_id": call.id,
            "tool_name": call.name,
            "tool_args": call.arguments,
            "resolved_command": resolved_command,
        });
        if let Some(outcome) = self.run_hook(HookPhase::PreToolExec, &hook_payload).await? {
            if outcome.control.skip || outcome.control.action == ControlAction::Abort {
                let (status, verb) = if outcome.control.skip {
                    (ActionStatus::Success, "skipped")
                } else {
                    (ActionStatus::Error, "aborted")
                };
                let mut observation = format!("{verb} by pre_tool_exec hook");
                if let Some(message) = &outcome.control.message {
                    observation = format!("{observation}: {message}");
                }
                return self
                    .finish_action(call, status, observation, None, counted_pair)
                    .await;
            }
        }

        let (status, observation, execution_ref) = match (tool_def, invocation) {
            (Some(tool_def), Some(Ok(invocation))) => {
                let exec_id = delta_journal::new_token();
                let ctx = ExecutionContext {
                    workspace: &self.workspace,
                    agent_home: &self.agent_home,
                };
                let result = delta_tool::execute(&tool_def, &invocation, &ctx).await;
                self.audit
                    .write_tool_execution(
                        &exec_id,
                        &ToolExecutionCapture {
                            command: &invocation.argv,
                            stdin: invocation.stdin.as_deref(),
                            stdout: &result.stdout,
                            stderr: &result.stderr,
                            exit_code: result.exit_code,
                            duration_ms: result.duration_ms,
                        },
                    )
                    .await;
                let status = match &result.failure {
                    Some(ExecutionFailure::Spawn(_)) => ActionStatus::Error,
                    Some(ExecutionFailure::Timeout { .. }) => ActionStatus::Failed,
                    None if result.success => ActionStatus::Success,
                    None => ActionStatus::Failed,
                };
                let observation = truncate_observation(&format!(
                    "STDOUT:\n{}\nSTDERR:\n{}\nEXIT CODE: {}",
                    result.stdout, result.stderr, result.exit_code
                ));
                (status, observation, Some(exec_id))
            }
            (Some(_), Some(Err(e))) => (ActionStatus::Error, e.to_string(), None),
            _ => (
                ActionStatus::Error,
                format!("Tool not found: {}", call.name),
                None,
            ),
        };

        self.finish_action(call, status, observation, execution_ref, counted_pair)
            .await
    }

    /// Common tail of every tool-call path: append the ACTION_RESULT,
    /// count the pair, and run the advisory `post_tool_exec` hook.
    async fn finish_action(
        &mut self,
        call: &ToolInvocation,
        status: ActionStatus,
        observation: String,
        execution_ref: Option<String>,
        counted_pair: &mut bool,
    ) -> Result<(), EngineError> {
        self.append(EventPayload::ActionResult {
            action_id: call.id.clone(),
            status,
            observation_content: observation.clone(),
            execution_ref: execution_ref.clone(),
        })
        .await?;
        *counted_pair = true;

        let post = serde_json::json!({
            "action_id": call.id,
            "tool_name": call.name,
            "status": status,
            "observation_content": observation,
            "execution_ref": execution_ref,
        });
        self.run_hook(HookPhase::PostToolExec, &post).await?;
        Ok(())
    }

    async fn handle_ask_human(&mut self, call: &ToolInvocation) -> Result<AskHumanFlow, EngineError> {
        let args = AskHumanArgs::parse(&call.arguments);
        self.append(EventPayload::ActionRequest {
            action_id: call.id.clone(),
            tool_name: ASK_HUMAN_TOOL.into(),
            tool_args: call.arguments.clone(),
            resolved_command: ASK_HUMAN_TOOL.into(),
        })
        .await?;

        if self.interactive {
            let answer = broker::prompt_interactive(&args).await?;
            self.append(EventPayload::ActionResult {
                action_id: call.id.clone(),
                status: ActionStatus::Success,
                observation_content: answer.clone(),
                execution_ref: None,
            })
            .await?;
            return Ok(AskHumanFlow::Answered(answer));
        }

        broker::write_request(&self.paths.interaction_dir(), &args).await?;
        self.metadata
            .update(|m| {
                m.status = RunStatus::WaitingForInput;
                m.end_time = Some(chrono::Utc::now().to_rfc3339());
            })
            .await?;
        Ok(AskHumanFlow::Paused)
    }

    /// On resume: if an `ask_human` request was left unanswered and the
    /// human has since written `interaction/response.txt`, turn it into
    /// the observation and clear the exchange. With no response the loop
    /// just proceeds (and will re-pause at the next `ask_human`).
    async fn resolve_pending_interaction(
        &mut self,
        events: &[JournalEvent],
    ) -> Result<(), EngineError> {
        let pending = pending_ask_human(events);
        let Some(action_id) = pending else {
            return Ok(());
        };
        let interaction = self.paths.interaction_dir();
        let Some(response) = broker::pending_response(&interaction).await else {
            tracing::info!(run_id = %self.run_id, "pending ask_human has no response yet");
            return Ok(());
        };
        self.append(EventPayload::ActionResult {
            action_id,
            status: ActionStatus::Success,
            observation_content: response,
            execution_ref: None,
        })
        .await?;
        broker::clear_exchange(&interaction).await;
        Ok(())
    }

    async fn finish_completed(
        &mut self,
        final_response: Option<String>,
    ) -> Result<RunOutcome, EngineError> {
        let payload = serde_json::json!({
            "status": RunStatus::Completed,
            "final_response": final_response,
            "iterations_completed": self.iterations_completed,
        });
        self.run_hook(HookPhase::OnRunEnd, &payload).await?;
        self.append(EventPayload::RunEnd {
            status: RunStatus::Completed,
            final_response: final_response.clone(),
            error: None,
        })
        .await?;
        self.metadata
            .update(|m| {
                m.status = RunStatus::Completed;
                m.end_time = Some(chrono::Utc::now().to_rfc3339());
            })
            .await?;
        Ok(RunOutcome {
            run_id: self.run_id.clone(),
            status: RunStatus::Completed,
            final_response,
            iterations_completed: self.iterations_completed,
        })
    }

    /// Fatal-path teardown. Everything here is best-effort — the
    /// original error propagates regardless of what else fails.
    async fn finish_failed(&mut self, error: EngineError) -> Result<RunOutcome, EngineError> {
        let message = error.to_string();
        tracing::error!(run_id = %self.run_id, error = %message, "run failed");

        let payload = serde_json::json!({
            "error_type": error_type(&error),
            "message": message,
            "context": {
                "run_id": self.run_id,
                "iterations_completed": self.iterations_completed,
                "last_seq": self.next_seq - 1,
            },
        });
        if let Some(outcome) = self.hooks.run(HookPhase::OnError, self.next_seq, &payload).await {
            let _ = self.record_hook(HookPhase::OnError, &outcome).await;
        }

        let _ = self
            .append(EventPayload::SystemMessage {
                level: SystemLevel::Error,
                message: message.clone(),
            })
            .await;

        let end_payload = serde_json::json!({
            "status": RunStatus::Failed,
            "error": message,
            "iterations_completed": self.iterations_completed,
        });
        if let Some(outcome) = self
            .hooks
            .run(HookPhase::OnRunEnd, self.next_seq, &end_payload)
            .await
        {
            let _ = self.record_hook(HookPhase::OnRunEnd, &outcome).await;
        }

        let _ = self
            .append(EventPayload::RunEnd {
                status: RunStatus::Failed,
                final_response: None,
                error: Some(message.clone()),
            })
            .await;
        let _ = self
            .metadata
            .update(|m| {
                m.status = RunStatus::Failed;
                m.end_time = Some(chrono::Utc::now().to_rfc3339());
                m.error = Some(message);
            })
            .await;

        Err(error)
    }

    /// Run a configured hook and journal its audit record. A degraded
    /// hook additionally leaves a WARN system message.
    async fn run_hook(
        &mut self,
        phase: HookPhase,
        payload: &serde_json::Value,
    ) -> Result<Option<HookOutcome>, EngineError> {
        let Some(outcome) = self.hooks.run(phase, self.next_seq, payload).await else {
            return Ok(None);
        };
        self.record_hook(phase, &outcome).await?;
        Ok(Some(outcome))
    }

    async fn record_hook(
        &mut self,
        phase: HookPhase,
        outcome: &HookOutcome,
    ) -> Result<(), EngineError> {
        self.append(EventPayload::HookExecutionAudit {
            hook_name: phase.as_str().into(),
            status: outcome.status,
            io_path_ref: outcome.io_path.clone(),
            duration_ms: outcome.duration_ms,
        })
        .await?;
        if let Some(detail) = &outcome.detail {
            tracing::warn!(phase = %phase, detail, "hook degraded");
            self.append(EventPayload::SystemMessage {
                level: SystemLevel::Warn,
                message: format!("{phase} hook degraded: {detail}"),
            })
            .await?;
        }
        Ok(())
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .config
            .tools
            .iter()
            .map(|tool| {
                let mut properties = serde_json::Map::new();
                let mut required = Vec::new();
                for param in &tool.parameters {
                    let mut prop = serde_json::Map::new();
                    prop.insert("type".into(), serde_json::json!(param.param_type));
                    if let Some(description) = &param.description {
                        prop.insert("description".into(), serde_json::json!(description));
                    }
                    properties.insert(param.name.clone(), serde_json::Value::Object(prop));
                    required.push(serde_json::json!(param.name));
                }
                ToolSchema::function(
                    &tool.name,
                    tool.description.clone(),
                    serde_json::json!({
                        "type": "object",
                        "properties": properties,
                        "required": required,
                    }),
                )
            })
            .collect();
        schemas.push(broker::tool_schema());
        schemas
    }

    async fn append(&mut self, payload: EventPayload) -> Result<(), EngineError> {
        let event = JournalEvent::new(self.next_seq, payload);
        self.journal.append(&event).await?;
        self.next_seq += 1;
        Ok(())
    }
}

/// The action_id of the most recent `ask_human` request that has no
/// result, if any.
fn pending_ask_human(events: &[JournalEvent]) -> Option<String> {
    let mut pending = None;
    for event in events {
        match &event.payload {
            EventPayload::ActionRequest {
                action_id,
                tool_name,
                ..
            } if tool_name == ASK_HUMAN_TOOL => {
                pending = Some(action_id.clone());
            }
            EventPayload::ActionResult { action_id, .. } => {
                if pending.as_deref() == Some(action_id) {
                    pending = None;
                }
            }
            _ => {}
        }
    }
    pending
}

fn error_type(error: &EngineError) -> &'static str {
    match error {
        EngineError::Config(_) => "configuration",
        EngineError::Journal(_) => "journal",
        EngineError::Context(_) => "context",
        EngineError::Provider(_) => "provider",
        EngineError::ResumeRefused(_) => "resume_refused",
        EngineError::Io(_) => "io",
        _ => "other",
    }
}

/// Cap an observation at [`OBSERVATION_CAP`] bytes, marking the cut.
fn truncate_observation(text: &str) -> String {
    if text.len() <= OBSERVATION_CAP {
        return text.to_string();
    }
    let mut cut = OBSERVATION_CAP;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &text[..cut])
}
