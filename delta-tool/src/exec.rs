//! Argument composition and subprocess execution.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use delta_types::{InjectAs, ToolDefinition, ToolError};
use tokio::io::AsyncWriteExt;

/// Hard wall-clock ceiling for a tool subprocess unless the definition
/// overrides it.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;

/// A tool definition resolved against concrete arguments: ready to spawn.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInvocation {
    /// Full argv, program first.
    pub argv: Vec<String>,
    /// Bytes destined for stdin, if the tool takes a stdin parameter and
    /// the model provided it.
    pub stdin: Option<String>,
}

/// Where and as whom a tool runs.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    /// The run's working directory (the parent of `.delta/`).
    pub workspace: &'a Path,
    /// The agent root, exported as `AGENT_HOME`.
    pub agent_home: &'a Path,
}

/// What a subprocess produced.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Captured stdout, unabridged.
    pub stdout: String,
    /// Captured stderr, unabridged.
    pub stderr: String,
    /// Exit code; -1 when the process died without one (signal, timeout).
    pub exit_code: i32,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// `exit_code == 0` and no failure.
    pub success: bool,
    /// Why the execution failed before/outside normal exit, if it did.
    pub failure: Option<ExecutionFailure>,
}

/// Failure modes that are results, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionFailure {
    /// The process could not be started at all.
    Spawn(String),
    /// The hard timeout fired and the process was killed.
    Timeout {
        /// The ceiling that was enforced.
        timeout_ms: u64,
    },
}

/// Compose argv and stdin from a definition and model-supplied arguments.
///
/// Parameters are consumed in declaration order. A missing `argument` or
/// `option` value is simply omitted — absence means "not provided". At
/// most one parameter may inject as stdin. `${AGENT_HOME}` in command
/// entries is substituted here.
pub fn compose(
    tool: &ToolDefinition,
    args: &serde_json::Value,
    agent_home: &Path,
) -> Result<ResolvedInvocation, ToolError> {
    if tool.command.is_empty() {
        return Err(ToolError::InvalidDefinition {
            tool: tool.name.clone(),
            reason: "command is empty".into(),
        });
    }

    let home = agent_home.display().to_string();
    let mut argv: Vec<String> = tool
        .command
        .iter()
        .map(|entry| entry.replace("${AGENT_HOME}", &home))
        .collect();

    let mut stdin = None;
    let mut stdin_seen = false;
    for param in &tool.parameters {
        let value = args.get(&param.name).filter(|v| !v.is_null());
        match param.inject_as {
            InjectAs::Argument => {
                if let Some(value) = value {
                    argv.push(coerce(value));
                }
            }
            InjectAs::Option => {
                let option_name =
                    param
                        .option_name
                        .as_deref()
                        .ok_or_else(|| ToolError::InvalidDefinition {
                            tool: tool.name.clone(),
                            reason: format!("parameter '{}' injects as option but has no option_name", param.name),
                        })?;
                if let Some(value) = value {
                    argv.push(option_name.to_string());
                    argv.push(coerce(value));
                }
            }
            InjectAs::Stdin => {
                if stdin_seen {
                    return Err(ToolError::InvalidDefinition {
                        tool: tool.name.clone(),
                        reason: "more than one stdin parameter".into(),
                    });
                }
                stdin_seen = true;
                // Silently skipped when the model did not provide it.
                stdin = value.map(coerce);
            }
        }
    }

    Ok(ResolvedInvocation { argv, stdin })
}

/// Separate strict check: every declared parameter must be present.
/// The composer itself treats absence as "not provided".
pub fn validate_required(tool: &ToolDefinition, args: &serde_json::Value) -> Result<(), ToolError> {
    for param in &tool.parameters {
        if args.get(&param.name).filter(|v| !v.is_null()).is_none() {
            return Err(ToolError::MissingParameter {
                tool: tool.name.clone(),
                parameter: param.name.clone(),
            });
        }
    }
    Ok(())
}

/// Natural string form of a model-supplied value.
fn coerce(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Run a resolved invocation to completion.
///
/// CWD is the workspace, the environment is inherited plus `AGENT_HOME`,
/// stdin is piped (or closed immediately when there is none), and both
/// output streams are captured in full. Timeout, spawn failure, and
/// non-zero exit all come back as a result with `success == false`.
pub async fn execute(
    tool: &ToolDefinition,
    invocation: &ResolvedInvocation,
    ctx: &ExecutionContext<'_>,
) -> ExecutionResult {
    let start = Instant::now();
    let timeout_ms = tool.timeout_ms.unwrap_or(DEFAULT_TOOL_TIMEOUT_MS);

    let mut command = tokio::process::Command::new(&invocation.argv[0]);
    command
        .args(&invocation.argv[1..])
        .current_dir(ctx.workspace)
        .env("AGENT_HOME", ctx.agent_home)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecutionResult {
                stdout: String::new(),
                stderr: format!("failed to spawn {}: {e}", invocation.argv[0]),
                exit_code: -1,
                duration_ms: elapsed_ms(start),
                success: false,
                failure: Some(ExecutionFailure::Spawn(e.to_string())),
            };
        }
    };

    // Feed stdin from a task so a child that fills its stdout pipe before
    // reading stdin cannot deadlock the write.
    if let (Some(data), Some(mut handle)) = (invocation.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            // A tool that exits without reading stdin closes the pipe;
            // that is its business, not a failure.
            let _ = handle.write_all(data.as_bytes()).await;
            let _ = handle.shutdown().await;
        });
    }

    match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(-1);
            ExecutionResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code,
                duration_ms: elapsed_ms(start),
                success: output.status.success(),
                failure: None,
            }
        }
        Ok(Err(e)) => ExecutionResult {
            stdout: String::new(),
            stderr: format!("failed to collect output: {e}"),
            exit_code: -1,
            duration_ms: elapsed_ms(start),
            success: false,
            failure: Some(ExecutionFailure::Spawn(e.to_string())),
        },
        // Dropping the wait future kills the child (kill_on_drop).
        Err(_) => ExecutionResult {
            stdout: String::new(),
            stderr: format!("execution timed out after {timeout_ms} ms"),
            exit_code: -1,
            duration_ms: elapsed_ms(start),
            success: false,
            failure: Some(ExecutionFailure::Timeout { timeout_ms }),
        },
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_types::Parameter;
    use serde_json::json;

    fn tool(command: &[&str], parameters: Vec<Parameter>, stdin: Option<&str>) -> ToolDefinition {
        ToolDefinition {
            name: "t".into(),
            command: command.iter().map(|s| s.to_string()).collect(),
            parameters,
            stdin_parameter: stdin.map(String::from),
            timeout_ms: None,
            description: None,
        }
    }

    fn param(name: &str, inject_as: InjectAs, option_name: Option<&str>) -> Parameter {
        Parameter {
            name: name.into(),
            param_type: "string".into(),
            inject_as,
            option_name: option_name.map(String::from),
            position: None,
            description: None,
        }
    }

    #[test]
    fn composes_in_declaration_order() {
        let tool = tool(
            &["grep"],
            vec![
                param("flags", InjectAs::Option, Some("-e")),
                param("file", InjectAs::Argument, None),
            ],
            None,
        );
        let invocation = compose(
            &tool,
            &json!({"flags": "TODO", "file": "src/main.rs"}),
            Path::new("/agents/a"),
        )
        .unwrap();
        assert_eq!(invocation.argv, vec!["grep", "-e", "TODO", "src/main.rs"]);
        assert_eq!(invocation.stdin, None);
    }

    #[test]
    fn missing_values_are_omitted_not_errors() {
        let tool = tool(
            &["ls"],
            vec![
                param("flags", InjectAs::Option, Some("-l")),
                param("dir", InjectAs::Argument, None),
            ],
            None,
        );
        let invocation = compose(&tool, &json!({}), Path::new("/a")).unwrap();
        assert_eq!(invocation.argv, vec!["ls"]);
    }

    #[test]
    fn null_counts_as_missing() {
        let tool = tool(&["ls"], vec![param("dir", InjectAs::Argument, None)], None);
        let invocation = compose(&tool, &json!({"dir": null}), Path::new("/a")).unwrap();
        assert_eq!(invocation.argv, vec!["ls"]);
    }

    #[test]
    fn non_string_values_coerce_naturally() {
        let tool = tool(
            &["head"],
            vec![
                param("count", InjectAs::Option, Some("-n")),
                param("verbose", InjectAs::Argument, None),
            ],
            None,
        );
        let invocation = compose(
            &tool,
            &json!({"count": 5, "verbose": true}),
            Path::new("/a"),
        )
        .unwrap();
        assert_eq!(invocation.argv, vec!["head", "-n", "5", "true"]);
    }

    #[test]
    fn agent_home_is_substituted_in_command() {
        let tool = tool(&["python3", "${AGENT_HOME}/tools/run.py"], vec![], None);
        let invocation = compose(&tool, &json!({}), Path::new("/agents/demo")).unwrap();
        assert_eq!(invocation.argv[1], "/agents/demo/tools/run.py");
    }

    #[test]
    fn stdin_value_is_captured_not_appended() {
        let tool = tool(
            &["wc", "-l"],
            vec![param("content", InjectAs::Stdin, None)],
            Some("content"),
        );
        let invocation = compose(&tool, &json!({"content": "a\nb\n"}), Path::new("/a")).unwrap();
        assert_eq!(invocation.argv, vec!["wc", "-l"]);
        assert_eq!(invocation.stdin.as_deref(), Some("a\nb\n"));
    }

    #[test]
    fn missing_stdin_is_silently_skipped() {
        let tool = tool(
            &["wc"],
            vec![param("content", InjectAs::Stdin, None)],
            Some("content"),
        );
        let invocation = compose(&tool, &json!({}), Path::new("/a")).unwrap();
        assert_eq!(invocation.stdin, None);
    }

    #[test]
    fn two_stdin_parameters_are_rejected() {
        let tool = tool(
            &["cat"],
            vec![
                param("a", InjectAs::Stdin, None),
                param("b", InjectAs::Stdin, None),
            ],
            None,
        );
        let err = compose(&tool, &json!({"a": "x", "b": "y"}), Path::new("/")).unwrap_err();
        assert!(matches!(err, ToolError::InvalidDefinition { .. }));
    }

    #[test]
    fn option_without_name_is_rejected() {
        let tool = tool(&["x"], vec![param("p", InjectAs::Option, None)], None);
        let err = compose(&tool, &json!({"p": "v"}), Path::new("/")).unwrap_err();
        assert!(matches!(err, ToolError::InvalidDefinition { .. }));
    }

    #[test]
    fn validate_required_flags_each_absence() {
        let tool = tool(
            &["echo"],
            vec![param("msg", InjectAs::Argument, None)],
            None,
        );
        assert!(validate_required(&tool, &json!({"msg": "hi"})).is_ok());
        let err = validate_required(&tool, &json!({})).unwrap_err();
        assert!(matches!(
            err,
            ToolError::MissingParameter { ref parameter, .. } if parameter == "msg"
        ));
    }
}
