//! Agent configuration: `agent.yaml`, imports, tool shapes, `hooks.yaml`.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use delta_tool::expand::{expand_exec, expand_shell, ParameterOverride, SugarSpec};
use delta_types::{
    AgentConfig, ConfigError, HookPhase, HookSpec, InjectAs, LlmConfig, Parameter, ToolDefinition,
};
use serde::Deserialize;

/// Accepted agent configuration file names, in lookup order.
pub const AGENT_FILE_NAMES: &[&str] = &["agent.yaml", "config.yaml"];

/// The sibling hooks file. When present it wins over `lifecycle_hooks`.
pub const HOOKS_FILE_NAME: &str = "hooks.yaml";

/// One configuration file as it appears on disk, before merging.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAgentFile {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    llm: Option<LlmConfig>,
    #[serde(default)]
    tools: Vec<RawTool>,
    max_iterations: Option<u32>,
    lifecycle_hooks: Option<BTreeMap<HookPhase, HookSpec>>,
    #[serde(default)]
    imports: Vec<String>,
}

/// A tool in any of its three shapes. Which shape it is gets decided
/// during normalization, not by the parser.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTool {
    name: String,
    description: Option<String>,
    timeout_ms: Option<u64>,
    // Explicit shape.
    command: Option<Vec<String>>,
    stdin_parameter: Option<String>,
    // Sugar shapes.
    exec: Option<String>,
    shell: Option<String>,
    stdin: Option<String>,
    // Vec<Parameter> for the explicit shape, Vec<ParameterOverride> for
    // sugar; disambiguated in normalize().
    parameters: Option<serde_json::Value>,
}

/// Load and fully resolve the agent configuration under `agent_home`.
///
/// Resolution order: imports (depth-first, in listed order), then the
/// importing file's own content — so on a tool-name collision the
/// outermost definition wins. `hooks.yaml`, when present, replaces
/// whatever `lifecycle_hooks` the configuration files produced.
pub fn load_agent_config(agent_home: &Path) -> Result<AgentConfig, ConfigError> {
    let entry = AGENT_FILE_NAMES
        .iter()
        .map(|name| agent_home.join(name))
        .find(|path| path.exists())
        .ok_or_else(|| ConfigError::NotFound(agent_home.display().to_string()))?;

    let mut merged = Merged::default();
    let mut stack = Vec::new();
    merge_file(agent_home, &entry, &mut merged, &mut stack)?;

    let hooks = load_hooks_file(agent_home, merged.lifecycle_hooks)?;

    let path_display = entry.display().to_string();
    let llm = merged.llm.ok_or_else(|| ConfigError::Invalid {
        path: path_display.clone(),
        reason: "llm section is required".into(),
    })?;
    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Invalid {
            path: path_display.clone(),
            reason: format!("temperature {} out of range 0-2", llm.temperature),
        });
    }

    let config = AgentConfig {
        name: merged.name.ok_or_else(|| ConfigError::Invalid {
            path: path_display.clone(),
            reason: "name is required".into(),
        })?,
        version: merged.version.unwrap_or_else(|| "0.0.0".into()),
        description: merged.description,
        llm,
        tools: merged.tools,
        max_iterations: merged.max_iterations.unwrap_or(30),
        lifecycle_hooks: hooks,
    };

    for tool in &config.tools {
        validate_tool(tool, &path_display)?;
    }
    Ok(config)
}

#[derive(Default)]
struct Merged {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    llm: Option<LlmConfig>,
    tools: Vec<ToolDefinition>,
    max_iterations: Option<u32>,
    lifecycle_hooks: Option<BTreeMap<HookPhase, HookSpec>>,
}

fn merge_file(
    agent_home: &Path,
    path: &Path,
    merged: &mut Merged,
    stack: &mut Vec<PathBuf>,
) -> Result<(), ConfigError> {
    let canonical = path
        .canonicalize()
        .map_err(|_| ConfigError::BadImportPath(path.display().to_string()))?;
    if stack.contains(&canonical) {
        return Err(ConfigError::CircularImport(path.display().to_string()));
    }
    stack.push(canonical);

    let text = std::fs::read_to_string(path)?;
    let raw: RawAgentFile =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::InvalidYaml {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    // Imports first: the importing file's own content writes last and
    // therefore wins.
    for import in &raw.imports {
        let import_path = validate_import_path(agent_home, import)?;
        merge_file(agent_home, &import_path, merged, stack)?;
    }

    if raw.name.is_some() {
        merged.name = raw.name;
    }
    if raw.version.is_some() {
        merged.version = raw.version;
    }
    if raw.description.is_some() {
        merged.description = raw.description;
    }
    if raw.llm.is_some() {
        merged.llm = raw.llm;
    }
    if raw.max_iterations.is_some() {
        merged.max_iterations = raw.max_iterations;
    }
    if let Some(hooks) = raw.lifecycle_hooks {
        merged.lifecycle_hooks = Some(hooks);
    }

    for raw_tool in raw.tools {
        let tool = normalize(raw_tool, path)?;
        // Last write wins on tool name, preserving first-seen order.
        match merged.tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => *existing = tool,
            None => merged.tools.push(tool),
        }
    }

    stack.pop();
    Ok(())
}

/// Imports must be relative and must not escape the agent root.
fn validate_import_path(agent_home: &Path, import: &str) -> Result<PathBuf, ConfigError> {
    let relative = Path::new(import);
    if relative.is_absolute() {
        return Err(ConfigError::BadImportPath(import.to_string()));
    }
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(ConfigError::BadImportPath(import.to_string()));
    }
    Ok(agent_home.join(relative))
}

/// Collapse a raw tool into the normalized form, expanding sugar.
fn normalize(raw: RawTool, path: &Path) -> Result<ToolDefinition, ConfigError> {
    let shapes =
        raw.command.is_some() as u8 + raw.exec.is_some() as u8 + raw.shell.is_some() as u8;
    if shapes != 1 {
        return Err(ConfigError::Invalid {
            path: path.display().to_string(),
            reason: format!(
                "tool '{}' must have exactly one of command, exec, shell",
                raw.name
            ),
        });
    }

    if let Some(command) = raw.command {
        if raw.stdin.is_some() {
            return Err(ConfigError::Invalid {
                path: path.display().to_string(),
                reason: format!(
                    "tool '{}': explicit form uses stdin_parameter, not stdin",
                    raw.name
                ),
            });
        }
        let parameters: Vec<Parameter> = match raw.parameters {
            Some(value) => {
                serde_json::from_value(value).map_err(|e| ConfigError::Invalid {
                    path: path.display().to_string(),
                    reason: format!("tool '{}': bad parameters: {e}", raw.name),
                })?
            }
            None => Vec::new(),
        };
        return Ok(ToolDefinition {
            name: raw.name,
            command,
            parameters,
            stdin_parameter: raw.stdin_parameter,
            timeout_ms: raw.timeout_ms,
            description: raw.description,
        });
    }

    let overrides: Vec<ParameterOverride> = match raw.parameters {
        Some(value) => serde_json::from_value(value).map_err(|e| ConfigError::Invalid {
            path: path.display().to_string(),
            reason: format!("tool '{}': bad parameters: {e}", raw.name),
        })?,
        None => Vec::new(),
    };
    let sugar = SugarSpec {
        name: &raw.name,
        template: raw.exec.as_deref().or(raw.shell.as_deref()).unwrap_or(""),
        stdin: raw.stdin.as_deref(),
        overrides: &overrides,
        description: raw.description.clone(),
        timeout_ms: raw.timeout_ms,
    };
    if raw.exec.is_some() {
        expand_exec(&sugar)
    } else {
        expand_shell(&sugar)
    }
}

fn validate_tool(tool: &ToolDefinition, path: &str) -> Result<(), ConfigError> {
    if tool.command.is_empty() {
        return Err(ConfigError::Invalid {
            path: path.to_string(),
            reason: format!("tool '{}': command is empty", tool.name),
        });
    }
    let stdin_count = tool
        .parameters
        .iter()
        .filter(|p| p.inject_as == InjectAs::Stdin)
        .count();
    if stdin_count > 1 {
        return Err(ConfigError::Invalid {
            path: path.to_string(),
            reason: format!("tool '{}': more than one stdin parameter", tool.name),
        });
    }
    for param in &tool.parameters {
        if param.inject_as == InjectAs::Option && param.option_name.is_none() {
            return Err(ConfigError::Invalid {
                path: path.to_string(),
                reason: format!(
                    "tool '{}': parameter '{}' injects as option without option_name",
                    tool.name, param.name
                ),
            });
        }
    }
    Ok(())
}

/// `hooks.yaml` accepts either a top-level `lifecycle_hooks:` key or the
/// phase map directly. When the file exists it wins wholesale.
fn load_hooks_file(
    agent_home: &Path,
    from_config: Option<BTreeMap<HookPhase, HookSpec>>,
) -> Result<BTreeMap<HookPhase, HookSpec>, ConfigError> {
    let path = agent_home.join(HOOKS_FILE_NAME);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(from_config.unwrap_or_default());
        }
        Err(e) => return Err(e.into()),
    };

    #[derive(Deserialize)]
    struct Wrapped {
        lifecycle_hooks: BTreeMap<HookPhase, HookSpec>,
    }
    let hooks = serde_yaml::from_str::<Wrapped>(&text)
        .map(|w| w.lifecycle_hooks)
        .or_else(|_| serde_yaml::from_str::<BTreeMap<HookPhase, HookSpec>>(&text))
        .map_err(|e| ConfigError::InvalidYaml {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    if from_config.is_some_and(|hooks| !hooks.is_empty()) {
        tracing::warn!(
            path = %path.display(),
            "both lifecycle_hooks and hooks.yaml are defined; hooks.yaml wins"
        );
    }
    Ok(hooks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, text: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, text).unwrap();
    }

    const MINIMAL: &str = "name: demo\nversion: '1.0'\nllm:\n  model: gpt-4o-mini\n";

    #[test]
    fn loads_minimal_agent() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "agent.yaml", MINIMAL);
        let config = load_agent_config(dir.path()).unwrap();
        assert_eq!(config.name, "demo");
        assert_eq!(config.max_iterations, 30);
        assert!((config.llm.temperature - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn falls_back_to_legacy_config_yaml() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.yaml", MINIMAL);
        assert!(load_agent_config(dir.path()).is_ok());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_agent_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn all_three_tool_shapes_normalize() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "agent.yaml",
            r#"
name: demo
version: '1.0'
llm: {model: m}
tools:
  - name: explicit
    command: [cat]
    parameters:
      - {name: path, type: string, inject_as: argument}
  - name: sugared
    exec: "grep -n ${pattern} ${file}"
  - name: piped
    shell: "ls ${dir} | head -3"
"#,
        );
        let config = load_agent_config(dir.path()).unwrap();
        assert_eq!(config.tools.len(), 3);
        assert_eq!(config.tool("explicit").unwrap().command, vec!["cat"]);
        assert_eq!(
            config.tool("sugared").unwrap().command,
            vec!["grep", "-n"]
        );
        assert_eq!(config.tool("piped").unwrap().command[0], "sh");
    }

    #[test]
    fn exec_metacharacters_fail_the_load() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "agent.yaml",
            "name: d\nversion: '1'\nllm: {model: m}\ntools:\n  - name: bad\n    exec: \"ls | wc\"\n",
        );
        let err = load_agent_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::BadTemplate { .. }));
    }

    #[test]
    fn two_shapes_on_one_tool_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "agent.yaml",
            "name: d\nversion: '1'\nllm: {model: m}\ntools:\n  - name: bad\n    command: [ls]\n    exec: ls\n",
        );
        let err = load_agent_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "agent.yaml",
            "name: d\nversion: '1'\nllm: {model: m, temperature: 3.5}\n",
        );
        let err = load_agent_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn imports_merge_with_importer_winning() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "shared/tools.yaml",
            r#"
tools:
  - name: echo
    exec: "echo imported ${msg}"
  - name: shared_only
    exec: "true"
"#,
        );
        write(
            dir.path(),
            "agent.yaml",
            r#"
name: demo
version: '1.0'
llm: {model: m}
imports: [shared/tools.yaml]
tools:
  - name: echo
    exec: "echo local ${msg}"
"#,
        );
        let config = load_agent_config(dir.path()).unwrap();
        assert_eq!(config.tools.len(), 2);
        let echo = config.tool("echo").unwrap();
        assert!(echo.command.contains(&"local".to_string()));
        assert!(config.tool("shared_only").is_some());
    }

    #[test]
    fn absolute_and_escaping_imports_are_rejected() {
        for import in ["/etc/evil.yaml", "../outside.yaml", "a/../../b.yaml"] {
            let dir = tempfile::tempdir().unwrap();
            write(
                dir.path(),
                "agent.yaml",
                &format!("name: d\nversion: '1'\nllm: {{model: m}}\nimports: ['{import}']\n"),
            );
            let err = load_agent_config(dir.path()).unwrap_err();
            assert!(
                matches!(err, ConfigError::BadImportPath(_)),
                "expected rejection of {import}"
            );
        }
    }

    #[test]
    fn import_cycles_are_detected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "agent.yaml",
            "name: d\nversion: '1'\nllm: {model: m}\nimports: [a.yaml]\n",
        );
        write(dir.path(), "a.yaml", "imports: [b.yaml]\n");
        write(dir.path(), "b.yaml", "imports: [a.yaml]\n");
        let err = load_agent_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::CircularImport(_)));
    }

    #[test]
    fn diamond_imports_are_fine() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "base.yaml", "tools:\n  - name: t\n    exec: 'true'\n");
        write(dir.path(), "a.yaml", "imports: [base.yaml]\n");
        write(dir.path(), "b.yaml", "imports: [base.yaml]\n");
        write(
            dir.path(),
            "agent.yaml",
            "name: d\nversion: '1'\nllm: {model: m}\nimports: [a.yaml, b.yaml]\n",
        );
        let config = load_agent_config(dir.path()).unwrap();
        assert_eq!(config.tools.len(), 1);
    }

    #[test]
    fn hooks_yaml_wins_over_lifecycle_hooks() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "agent.yaml",
            r#"
name: d
version: '1'
llm: {model: m}
lifecycle_hooks:
  pre_llm_req: {command: [from-config]}
"#,
        );
        write(
            dir.path(),
            "hooks.yaml",
            "lifecycle_hooks:\n  pre_tool_exec: {command: [from-hooks-file]}\n",
        );
        let config = load_agent_config(dir.path()).unwrap();
        assert!(!config.lifecycle_hooks.contains_key(&HookPhase::PreLlmReq));
        assert_eq!(
            config.lifecycle_hooks[&HookPhase::PreToolExec].command,
            vec!["from-hooks-file"]
        );
    }

    #[test]
    fn hooks_yaml_accepts_bare_phase_map() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "agent.yaml", MINIMAL);
        write(
            dir.path(),
            "hooks.yaml",
            "on_run_end: {command: [notify], timeout_ms: 5000}\n",
        );
        let config = load_agent_config(dir.path()).unwrap();
        assert_eq!(
            config.lifecycle_hooks[&HookPhase::OnRunEnd].timeout_ms,
            Some(5000)
        );
    }
}
