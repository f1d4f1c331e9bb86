//! The `ask_human` built-in tool.
//!
//! Interactive mode prompts on the controlling terminal and returns the
//! answer as the same-iteration observation. Async mode writes
//! `interaction/request.json`, flips the run to WAITING_FOR_INPUT, and
//! the process exits with code 101 — paused, not failed. On the next run
//! targeting the same run_id, a present `interaction/response.txt`
//! becomes the observation and both files are deleted.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// The name the model calls this tool by.
pub const ASK_HUMAN_TOOL: &str = "ask_human";

/// Arguments of an `ask_human` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskHumanArgs {
    /// What to ask.
    #[serde(default)]
    pub prompt: String,
    /// How to collect the answer.
    #[serde(default)]
    pub input_type: InputType,
    /// Marks the exchange as sensitive; recorded in the request so
    /// external UIs can mask it.
    #[serde(default)]
    pub sensitive: bool,
}

impl AskHumanArgs {
    /// Parse model-supplied arguments, tolerating partial objects.
    pub fn parse(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(Self {
            prompt: value
                .get("prompt")
                .and_then(|p| p.as_str())
                .unwrap_or_default()
                .to_string(),
            input_type: InputType::Text,
            sensitive: false,
        })
    }
}

/// How the human's answer is collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// A plain line of text.
    #[default]
    Text,
    /// Echo-suppressed input.
    Password,
    /// A yes/no answer.
    Confirmation,
}

/// The JSON schema `ask_human` is offered to the model with.
pub fn tool_schema() -> delta_types::ToolSchema {
    delta_types::ToolSchema::function(
        ASK_HUMAN_TOOL,
        Some("Ask the human operator a question and wait for their answer.".into()),
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string", "description": "The question to ask"},
                "input_type": {
                    "type": "string",
                    "enum": ["text", "password", "confirmation"],
                    "description": "How the answer is collected (default text)"
                },
                "sensitive": {"type": "boolean", "description": "Mask the answer in transcripts"}
            },
            "required": ["prompt"]
        }),
    )
}

/// Prompt on the controlling terminal (interactive mode).
pub async fn prompt_interactive(args: &AskHumanArgs) -> std::io::Result<String> {
    let args = args.clone();
    tokio::task::spawn_blocking(move || match args.input_type {
        InputType::Text => dialoguer::Input::<String>::new()
            .with_prompt(&args.prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(dialoguer_io),
        InputType::Password => dialoguer::Password::new()
            .with_prompt(&args.prompt)
            .interact()
            .map_err(dialoguer_io),
        InputType::Confirmation => dialoguer::Confirm::new()
            .with_prompt(&args.prompt)
            .interact()
            .map(|yes| if yes { "yes".into() } else { "no".into() })
            .map_err(dialoguer_io),
    })
    .await
    .map_err(std::io::Error::other)?
}

fn dialoguer_io(e: dialoguer::Error) -> std::io::Error {
    std::io::Error::other(e)
}

/// Write `interaction/request.json` for the async exchange. Returns the
/// request id.
pub async fn write_request(
    interaction_dir: &Path,
    args: &AskHumanArgs,
) -> std::io::Result<String> {
    tokio::fs::create_dir_all(interaction_dir).await?;
    let request_id = delta_journal::new_token();
    let request = serde_json::json!({
        "request_id": request_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "prompt": args.prompt,
        "input_type": args.input_type,
        "sensitive": args.sensitive,
    });
    tokio::fs::write(
        interaction_dir.join("request.json"),
        serde_json::to_vec_pretty(&request).map_err(std::io::Error::other)?,
    )
    .await?;
    Ok(request_id)
}

/// Read the trimmed `interaction/response.txt`, if the human has
/// answered.
pub async fn pending_response(interaction_dir: &Path) -> Option<String> {
    match tokio::fs::read_to_string(interaction_dir.join("response.txt")).await {
        Ok(text) => Some(text.trim().to_string()),
        Err(_) => None,
    }
}

/// Delete both sides of a completed exchange.
pub async fn clear_exchange(interaction_dir: &Path) {
    for name in ["request.json", "response.txt"] {
        let _ = tokio::fs::remove_file(interaction_dir.join(name)).await;
    }
}
