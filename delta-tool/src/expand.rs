//! Expansion of `exec:` and `shell:` tool sugar into the normalized form.
//!
//! `exec:` is for plain argv invocations: the template is tokenized on
//! whitespace, placeholder tokens become positional `argument` parameters,
//! and any shell metacharacter is a fatal configuration error.
//!
//! `shell:` is for pipelines: the template becomes a script passed to
//! `sh -c`, every placeholder becomes a quoted positional reference
//! (`"$1"`, `"$2"`, …), and the values arrive through argv — the shell
//! dereferences them after parsing, so quoting survives any content. The
//! `:raw` modifier drops the quotes and is the documented expert opt-out.

use delta_types::{ConfigError, InjectAs, Parameter, ToolDefinition};
use serde::{Deserialize, Serialize};

/// Metacharacter sequences that make an `exec:` template fatal.
const EXEC_FORBIDDEN: &[&str] = &["||", "&&", ">>", "$(", "|", ">", "<", ";", "&", "`"];

/// A `parameters:` entry accompanying sugar — may refine the description
/// and type of a templated parameter, never its injection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterOverride {
    /// Placeholder name the override applies to.
    pub name: String,
    /// Type refinement.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<String>,
    /// Description offered to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The sugar surface handed to [`expand_exec`] / [`expand_shell`].
#[derive(Debug, Clone)]
pub struct SugarSpec<'a> {
    /// Tool name.
    pub name: &'a str,
    /// The `exec:` or `shell:` template.
    pub template: &'a str,
    /// Name of an additional stdin parameter, if declared.
    pub stdin: Option<&'a str>,
    /// Optional refinements for templated parameters.
    pub overrides: &'a [ParameterOverride],
    /// Tool description.
    pub description: Option<String>,
    /// Per-tool timeout override.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
struct Placeholder {
    name: String,
    raw: bool,
}

/// Expand an `exec:` template.
///
/// Fails if the template contains shell metacharacters, a `:raw`
/// modifier, or a placeholder embedded inside a larger token.
pub fn expand_exec(spec: &SugarSpec<'_>) -> Result<ToolDefinition, ConfigError> {
    for forbidden in EXEC_FORBIDDEN {
        if spec.template.contains(forbidden) {
            return Err(bad_template(
                spec.name,
                format!("exec template contains shell metacharacter '{forbidden}'; use shell: for pipelines"),
            ));
        }
    }

    let mut command = Vec::new();
    let mut parameters = Vec::new();
    for (index, token) in spec.template.split_whitespace().enumerate() {
        match parse_single_placeholder(token) {
            Some(Ok(placeholder)) => {
                if placeholder.raw {
                    return Err(bad_template(
                        spec.name,
                        format!(":raw is not allowed in exec templates (parameter '{}')", placeholder.name),
                    ));
                }
                if parameters
                    .iter()
                    .any(|p: &Parameter| p.name == placeholder.name)
                {
                    return Err(bad_template(
                        spec.name,
                        format!("duplicate placeholder '{}'", placeholder.name),
                    ));
                }
                parameters.push(Parameter {
                    name: placeholder.name,
                    param_type: "string".into(),
                    inject_as: InjectAs::Argument,
                    option_name: None,
                    position: Some(index),
                    description: None,
                });
            }
            Some(Err(reason)) => return Err(bad_template(spec.name, reason)),
            None => {
                if token.contains("${") {
                    return Err(bad_template(
                        spec.name,
                        format!("placeholder must be a standalone token, found '{token}'"),
                    ));
                }
                command.push(token.to_string());
            }
        }
    }

    if command.is_empty() {
        return Err(bad_template(spec.name, "template has no program".into()));
    }

    finish(spec, command, parameters)
}

/// Expand a `shell:` template into `["sh", "-c", <script>, "--"]`.
///
/// Placeholders become `"$N"` references (bare `$N` under `:raw`) and
/// their values are appended to argv in placeholder order at execution
/// time, landing at `$1..$N` after the `--` sentinel.
pub fn expand_shell(spec: &SugarSpec<'_>) -> Result<ToolDefinition, ConfigError> {
    let mut names: Vec<String> = Vec::new();
    let mut script = String::new();
    let mut rest = spec.template;

    while let Some(start) = rest.find("${") {
        script.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            bad_template(spec.name, "unterminated placeholder '${'".into())
        })?;
        let placeholder = parse_placeholder_body(&after[..end])
            .map_err(|reason| bad_template(spec.name, reason))?;
        let position = match names.iter().position(|n| *n == placeholder.name) {
            Some(pos) => pos,
            None => {
                names.push(placeholder.name.clone());
                names.len() - 1
            }
        };
        if placeholder.raw {
            script.push_str(&format!("${}", position + 1));
        } else {
            script.push_str(&format!("\"${}\"", position + 1));
        }
        rest = &after[end + 1..];
    }
    script.push_str(rest);

    let parameters = names
        .iter()
        .enumerate()
        .map(|(position, name)| Parameter {
            name: name.clone(),
            param_type: "string".into(),
            inject_as: InjectAs::Argument,
            option_name: None,
            position: Some(position),
            description: None,
        })
        .collect();

    let command = vec!["sh".into(), "-c".into(), script, "--".into()];
    finish(spec, command, parameters)
}

/// Apply overrides and the stdin declaration, producing the final
/// normalized definition.
fn finish(
    spec: &SugarSpec<'_>,
    command: Vec<String>,
    mut parameters: Vec<Parameter>,
) -> Result<ToolDefinition, ConfigError> {
    for over in spec.overrides {
        let matches_stdin = spec.stdin == Some(over.name.as_str());
        let param = parameters.iter_mut().find(|p| p.name == over.name);
        match param {
            Some(param) => {
                if let Some(ty) = &over.param_type {
                    param.param_type = ty.clone();
                }
                param.description = over.description.clone();
            }
            None if matches_stdin => {} // applied below, when the stdin parameter exists
            None => {
                return Err(bad_template(
                    spec.name,
                    format!("parameters entry '{}' is not referenced by the template", over.name),
                ));
            }
        }
    }

    let stdin_parameter = match spec.stdin {
        Some(stdin_name) => {
            if parameters.iter().any(|p| p.name == stdin_name) {
                return Err(bad_template(
                    spec.name,
                    format!("stdin parameter '{stdin_name}' also appears as a placeholder"),
                ));
            }
            let over = spec.overrides.iter().find(|o| o.name == stdin_name);
            parameters.push(Parameter {
                name: stdin_name.to_string(),
                param_type: over
                    .and_then(|o| o.param_type.clone())
                    .unwrap_or_else(|| "string".into()),
                inject_as: InjectAs::Stdin,
                option_name: None,
                position: None,
                description: over.and_then(|o| o.description.clone()),
            });
            Some(stdin_name.to_string())
        }
        None => None,
    };

    Ok(ToolDefinition {
        name: spec.name.to_string(),
        command,
        parameters,
        stdin_parameter,
        timeout_ms: spec.timeout_ms,
        description: spec.description.clone(),
    })
}

/// Parse a token that should be exactly one `${...}` placeholder.
/// Returns `None` when the token contains no placeholder syntax at all.
fn parse_single_placeholder(token: &str) -> Option<Result<Placeholder, String>> {
    let body = token.strip_prefix("${")?.strip_suffix('}')?;
    Some(parse_placeholder_body(body))
}

fn parse_placeholder_body(body: &str) -> Result<Placeholder, String> {
    let (name, raw) = match body.strip_suffix(":raw") {
        Some(name) => (name, true),
        None => (body, false),
    };
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(format!("invalid placeholder name '{name}'"));
    }
    Ok(Placeholder {
        name: name.to_string(),
        raw,
    })
}

fn bad_template(tool: &str, reason: String) -> ConfigError {
    ConfigError::BadTemplate {
        tool: tool.to_string(),
        reason,
    }
}
