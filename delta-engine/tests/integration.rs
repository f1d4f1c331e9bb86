//! End-to-end runs against a scripted provider and real subprocess tools.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use delta_engine::{Engine, EngineOptions};
use delta_provider_openai::parse_assistant_message;
use delta_types::{
    ActionStatus, AgentConfig, ChatOutcome, ContextManifest, EventPayload, JournalEvent, Provider,
    ProviderError, RunMetadata, RunStatus,
};
use serde_json::json;

/// Replays canned Chat Completions responses and records every payload
/// it was sent.
struct ScriptedProvider {
    responses: Mutex<VecDeque<serde_json::Value>>,
    requests: Mutex<Vec<serde_json::Value>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<serde_json::Value>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<serde_json::Value> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(&self, payload: &serde_json::Value) -> Result<ChatOutcome, ProviderError> {
        self.requests.lock().unwrap().push(payload.clone());
        let raw = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::InvalidResponse("script exhausted".into()))?;
        Ok(ChatOutcome {
            message: parse_assistant_message(&raw)?,
            raw_response: raw,
            usage: None,
        })
    }
}

fn text_response(content: &str) -> serde_json::Value {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
}

fn tool_response(calls: &[(&str, &str, serde_json::Value)]) -> serde_json::Value {
    let tool_calls: Vec<_> = calls
        .iter()
        .map(|(id, name, args)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": args.to_string()}
            })
        })
        .collect();
    json!({"choices": [{"message": {
        "role": "assistant", "content": null, "tool_calls": tool_calls
    }}]})
}

fn config(extra: serde_json::Value) -> AgentConfig {
    let mut base = json!({
        "name": "test-agent",
        "version": "1.0.0",
        "llm": {"model": "gpt-4o-mini", "temperature": 0.0},
        "tools": [
            {"name": "echo", "command": ["echo"],
             "parameters": [{"name": "msg", "type": "string", "inject_as": "argument"}]},
            {"name": "fail", "command": ["sh", "-c", "exit 1"]}
        ]
    });
    base.as_object_mut()
        .unwrap()
        .extend(extra.as_object().cloned().unwrap_or_default());
    serde_json::from_value(base).unwrap()
}

fn manifest() -> ContextManifest {
    serde_json::from_value(json!({"sources": [{"type": "journal"}]})).unwrap()
}

fn options(workspace: &Path, agent_home: &Path, run_id: &str, task: &str) -> EngineOptions {
    EngineOptions {
        workspace: workspace.to_path_buf(),
        agent_home: agent_home.to_path_buf(),
        task: task.into(),
        run_id: Some(run_id.into()),
        interactive: false,
        force: false,
    }
}

fn read_journal(workspace: &Path, run_id: &str) -> Vec<JournalEvent> {
    let path = workspace
        .join(".delta")
        .join(run_id)
        .join("journal.jsonl");
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn read_metadata(workspace: &Path, run_id: &str) -> RunMetadata {
    let path = workspace.join(".delta").join(run_id).join("metadata.json");
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn type_names(events: &[JournalEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.payload.type_name()).collect()
}

// --- Scenario 1: single-shot completion ---

#[tokio::test]
async fn single_shot_completion() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![text_response("hello")]);

    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r1", "say hi"),
        config(json!({})),
        manifest(),
        provider.clone(),
    )
    .await
    .unwrap();
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.final_response.as_deref(), Some("hello"));
    assert_eq!(outcome.iterations_completed, 0);
    assert_eq!(outcome.exit_code(), 0);

    let events = read_journal(workspace.path(), "r1");
    assert_eq!(type_names(&events), vec!["RUN_START", "THOUGHT", "RUN_END"]);
    assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
    match &events[2].payload {
        EventPayload::RunEnd {
            status,
            final_response,
            ..
        } => {
            assert_eq!(*status, RunStatus::Completed);
            assert_eq!(final_response.as_deref(), Some("hello"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(read_metadata(workspace.path(), "r1").iterations_completed, 0);
}

// --- Scenario 2: tool loop capped by max_iterations ---

#[tokio::test]
async fn tool_loop_hits_the_iteration_ceiling() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response(&[("call_1", "echo", json!({"msg": "x"}))]),
        tool_response(&[("call_2", "echo", json!({"msg": "x"}))]),
    ]);

    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r2", "loop"),
        config(json!({"max_iterations": 2})),
        manifest(),
        provider.clone(),
    )
    .await
    .unwrap();
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(
        outcome.final_response.as_deref(),
        Some("Maximum iterations reached")
    );
    assert_eq!(outcome.iterations_completed, 2);

    let events = read_journal(workspace.path(), "r2");
    let results: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ActionResult { status, .. } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(results, vec![ActionStatus::Success, ActionStatus::Success]);
    assert_eq!(
        type_names(&events),
        vec![
            "RUN_START",
            "THOUGHT",
            "ACTION_REQUEST",
            "ACTION_RESULT",
            "THOUGHT",
            "ACTION_REQUEST",
            "ACTION_RESULT",
            "RUN_END"
        ]
    );
    assert_eq!(read_metadata(workspace.path(), "r2").iterations_completed, 2);
}

// --- Scenario 3: tool failure becomes an observation ---

#[tokio::test]
async fn failing_tool_is_observed_not_fatal() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response(&[("call_1", "fail", json!({}))]),
        text_response("it failed, as expected"),
    ]);

    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r3", "try the fail tool"),
        config(json!({})),
        manifest(),
        provider.clone(),
    )
    .await
    .unwrap();
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.iterations_completed, 1);

    let events = read_journal(workspace.path(), "r3");
    let (status, observation) = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::ActionResult {
                status,
                observation_content,
                ..
            } => Some((*status, observation_content.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(status, ActionStatus::Failed);
    assert!(observation.contains("EXIT CODE: 1"), "observation: {observation}");

    // The failure observation reached the model on the second call.
    let second_request = &provider.requests()[1];
    let serialized = second_request.to_string();
    assert!(serialized.contains("EXIT CODE: 1"));
}

// --- Scenario 4: async ask-human pause and resume ---

#[tokio::test]
async fn ask_human_pauses_and_resumes() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let run_dir = workspace.path().join(".delta").join("r4");

    // First run: the model asks a question; the run pauses.
    let provider = ScriptedProvider::new(vec![tool_response(&[(
        "call_ask",
        "ask_human",
        json!({"prompt": "name?"}),
    )])]);
    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r4", "greet me"),
        config(json!({})),
        manifest(),
        provider,
    )
    .await
    .unwrap();
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::WaitingForInput);
    assert_eq!(outcome.exit_code(), 101);
    assert_eq!(
        read_metadata(workspace.path(), "r4").status,
        RunStatus::WaitingForInput
    );

    let request: serde_json::Value =
        serde_json::from_slice(&std::fs::read(run_dir.join("interaction/request.json")).unwrap())
            .unwrap();
    assert_eq!(request["prompt"], "name?");

    let events = read_journal(workspace.path(), "r4");
    assert!(
        !events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::ActionResult { .. })),
        "a paused ask_human must leave no ACTION_RESULT"
    );
    assert!(
        !events
            .iter()
            .any(|e| matches!(e.payload, EventPayload::RunEnd { .. })),
        "a paused run has no RUN_END"
    );

    // The human answers.
    std::fs::write(run_dir.join("interaction/response.txt"), "alice\n").unwrap();

    // Second run on the same run_id: the answer becomes the observation.
    let provider = ScriptedProvider::new(vec![text_response("got alice")]);
    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r4", "greet me"),
        config(json!({})),
        manifest(),
        provider.clone(),
    )
    .await
    .unwrap();
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.final_response.as_deref(), Some("got alice"));

    let events = read_journal(workspace.path(), "r4");
    let observation = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::ActionResult {
                action_id,
                observation_content,
                ..
            } if action_id == "call_ask" => Some(observation_content.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(observation, "alice");
    assert!(!run_dir.join("interaction/request.json").exists());
    assert!(!run_dir.join("interaction/response.txt").exists());

    // Exactly one RUN_START across both liveness cycles.
    let starts = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::RunStart { .. }))
        .count();
    assert_eq!(starts, 1);
}

// --- Scenario 5: pre_llm_req may replace the payload ---

fn hooked_config(script: &str) -> AgentConfig {
    config(json!({
        "lifecycle_hooks": {
            "pre_llm_req": {"command": ["sh", "-c", script]}
        }
    }))
}

const MARKER_HOOK: &str = r#"
    sed 's/^}$/,"test_marker":"hook"}/' "$DELTA_HOOK_IO_PATH/input/proposed_payload.json" \
      | tr -d '\n' > "$DELTA_HOOK_IO_PATH/output/final_payload.json"
"#;

#[tokio::test]
async fn pre_llm_req_override_reaches_the_wire_and_the_audit() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![text_response("done")]);

    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r5", "task"),
        hooked_config(MARKER_HOOK),
        manifest(),
        provider.clone(),
    )
    .await
    .unwrap();
    engine.run().await.unwrap();

    assert_eq!(provider.requests()[0]["test_marker"], "hook");

    let invocations = workspace.path().join(".delta/r5/io/invocations");
    let entry = std::fs::read_dir(&invocations).unwrap().next().unwrap().unwrap();
    let request = std::fs::read_to_string(entry.path().join("request.json")).unwrap();
    assert!(request.contains("\"test_marker\""));
}

#[tokio::test]
async fn failed_pre_llm_req_hook_leaves_the_baseline() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();

    // The hook writes an override but exits non-zero; the override must
    // be ignored and the request must equal a hook-less run's baseline.
    let failing = format!("{MARKER_HOOK}\nexit 1");
    let provider = ScriptedProvider::new(vec![text_response("done")]);
    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r5f", "task"),
        hooked_config(&failing),
        manifest(),
        provider.clone(),
    )
    .await
    .unwrap();
    engine.run().await.unwrap();

    let bare_workspace = tempfile::tempdir().unwrap();
    let bare_provider = ScriptedProvider::new(vec![text_response("done")]);
    let mut bare = Engine::load(
        options(bare_workspace.path(), agent.path(), "r5b", "task"),
        config(json!({})),
        manifest(),
        bare_provider.clone(),
    )
    .await
    .unwrap();
    bare.run().await.unwrap();

    assert_eq!(provider.requests()[0], bare_provider.requests()[0]);

    // The degradation is journaled as a WARN system message.
    let events = read_journal(workspace.path(), "r5f");
    assert!(events.iter().any(|e| matches!(
        &e.payload,
        EventPayload::SystemMessage { message, .. } if message.contains("pre_llm_req")
    )));
}

// --- Scenario 6: orphaned-run recovery ---

#[tokio::test]
async fn orphaned_run_is_recovered_and_resumed() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let run_dir = workspace.path().join(".delta").join("r6");
    std::fs::create_dir_all(&run_dir).unwrap();

    let seeded = RunMetadata {
        run_id: "r6".into(),
        start_time: "2026-08-01T00:00:00Z".into(),
        start_time_unix: 1_785_542_400,
        end_time: None,
        agent_ref: agent.path().display().to_string(),
        task: "finish up".into(),
        status: RunStatus::Running,
        iterations_completed: 0,
        // Near the default pid_max ceiling; assumed unused.
        pid: 4_190_001,
        hostname: delta_engine::janitor::local_hostname(),
        process_name: "ghost-process".into(),
        error: None,
    };
    std::fs::write(
        run_dir.join("metadata.json"),
        serde_json::to_vec_pretty(&seeded).unwrap(),
    )
    .unwrap();
    let start = JournalEvent::new(
        1,
        EventPayload::RunStart {
            task: "finish up".into(),
            agent_ref: seeded.agent_ref.clone(),
        },
    );
    std::fs::write(
        run_dir.join("journal.jsonl"),
        format!("{}\n", serde_json::to_string(&start).unwrap()),
    )
    .unwrap();

    let provider = ScriptedProvider::new(vec![text_response("all done")]);
    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r6", "finish up"),
        config(json!({})),
        manifest(),
        provider,
    )
    .await
    .unwrap();
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let events = read_journal(workspace.path(), "r6");
    let starts = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::RunStart { .. }))
        .count();
    assert_eq!(starts, 1, "resume must not duplicate RUN_START");
    assert_eq!(events.last().unwrap().payload.type_name(), "RUN_END");
    assert_eq!(
        read_metadata(workspace.path(), "r6").status,
        RunStatus::Completed
    );
}

// --- Property: pre_tool_exec skip suppresses execution ---

#[tokio::test]
async fn skip_hook_suppresses_the_tool() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response(&[("call_1", "echo", json!({"msg": "nope"}))]),
        text_response("done"),
    ]);

    let skip_script =
        r#"echo '{"skip": true, "message": "blocked by policy"}' > "$DELTA_HOOK_IO_PATH/output/control.json""#;
    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r7", "task"),
        config(json!({
            "lifecycle_hooks": {"pre_tool_exec": {"command": ["sh", "-c", skip_script]}}
        })),
        manifest(),
        provider,
    )
    .await
    .unwrap();
    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    let events = read_journal(workspace.path(), "r7");
    let (status, observation) = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::ActionResult {
                status,
                observation_content,
                ..
            } => Some((*status, observation_content.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(status, ActionStatus::Success);
    assert!(observation.starts_with("skipped"), "observation: {observation}");

    // No tool execution audit directory was created for the skipped call.
    let exec_dir = workspace.path().join(".delta/r7/io/tool_executions");
    let executed = std::fs::read_dir(&exec_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(executed, 0);
}

// --- Property: unknown tools become ERROR observations ---

#[tokio::test]
async fn unknown_tool_is_an_error_observation() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response(&[("call_1", "teleport", json!({}))]),
        text_response("ok, no teleporting"),
    ]);

    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r8", "task"),
        config(json!({})),
        manifest(),
        provider,
    )
    .await
    .unwrap();
    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.iterations_completed, 1);

    let events = read_journal(workspace.path(), "r8");
    let (status, observation) = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::ActionResult {
                status,
                observation_content,
                ..
            } => Some((*status, observation_content.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(status, ActionStatus::Error);
    assert_eq!(observation, "Tool not found: teleport");
}

// --- Property: tool hooks fire even for unregistered tools ---

#[tokio::test]
async fn pre_tool_exec_hook_fires_for_unknown_tools() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response(&[("call_1", "teleport", json!({}))]),
        text_response("ok, no teleporting"),
    ]);

    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r8h", "task"),
        config(json!({
            "lifecycle_hooks": {
                "pre_tool_exec": {"command": ["sh", "-c", "exit 0"]},
                "post_tool_exec": {"command": ["sh", "-c", "exit 0"]}
            }
        })),
        manifest(),
        provider,
    )
    .await
    .unwrap();
    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);

    let events = read_journal(workspace.path(), "r8h");
    let audited: Vec<&str> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::HookExecutionAudit { hook_name, .. } => Some(hook_name.as_str()),
            _ => None,
        })
        .collect();
    assert!(
        audited.contains(&"pre_tool_exec"),
        "a policy hook must see the hallucinated tool call; audited: {audited:?}"
    );
    assert!(audited.contains(&"post_tool_exec"), "audited: {audited:?}");

    let (status, observation) = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::ActionResult {
                status,
                observation_content,
                ..
            } => Some((*status, observation_content.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(status, ActionStatus::Error);
    assert_eq!(observation, "Tool not found: teleport");
}

#[tokio::test]
async fn skip_hook_takes_precedence_over_tool_lookup() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response(&[("call_1", "teleport", json!({}))]),
        text_response("done"),
    ]);

    let skip_script =
        r#"echo '{"skip": true}' > "$DELTA_HOOK_IO_PATH/output/control.json""#;
    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r8s", "task"),
        config(json!({
            "lifecycle_hooks": {"pre_tool_exec": {"command": ["sh", "-c", skip_script]}}
        })),
        manifest(),
        provider,
    )
    .await
    .unwrap();
    engine.run().await.unwrap();

    // The skip decision lands before the tool lookup, so an unknown
    // name is skipped like any other call, not reported as missing.
    let events = read_journal(workspace.path(), "r8s");
    let (status, observation) = events
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::ActionResult {
                status,
                observation_content,
                ..
            } => Some((*status, observation_content.clone())),
            _ => None,
        })
        .unwrap();
    assert_eq!(status, ActionStatus::Success);
    assert!(observation.starts_with("skipped"), "observation: {observation}");
}

// --- Property: journal invariants over a full run ---

#[tokio::test]
async fn journal_seqs_are_contiguous_and_timestamps_monotone() {
    let workspace = tempfile::tempdir().unwrap();
    let agent = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        tool_response(&[
            ("call_1", "echo", json!({"msg": "a"})),
            ("call_2", "echo", json!({"msg": "b"})),
        ]),
        text_response("done"),
    ]);

    let mut engine = Engine::load(
        options(workspace.path(), agent.path(), "r9", "task"),
        config(json!({})),
        manifest(),
        provider,
    )
    .await
    .unwrap();
    engine.run().await.unwrap();

    let events = read_journal(workspace.path(), "r9");
    for (index, event) in events.iter().enumerate() {
        assert_eq!(event.seq, index as u64 + 1);
    }
    for pair in events.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }

    // Every result answers a prior request.
    for (index, event) in events.iter().enumerate() {
        if let EventPayload::ActionResult { action_id, .. } = &event.payload {
            let requested_before = events[..index].iter().any(|e| {
                matches!(&e.payload, EventPayload::ActionRequest { action_id: id, .. } if id == action_id)
            });
            assert!(requested_before, "result without a prior request");
        }
    }
}

// --- Property: replay determinism (event shapes, not timestamps/ids) ---

#[tokio::test]
async fn identical_scripts_produce_identical_event_sequences() {
    let script = || {
        vec![
            tool_response(&[("call_1", "echo", json!({"msg": "same"}))]),
            text_response("done"),
        ]
    };

    let mut shapes = Vec::new();
    for run_id in ["ra", "rb"] {
        let workspace = tempfile::tempdir().unwrap();
        let agent = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(script());
        let mut engine = Engine::load(
            options(workspace.path(), agent.path(), run_id, "task"),
            config(json!({})),
            manifest(),
            provider,
        )
        .await
        .unwrap();
        engine.run().await.unwrap();

        let events = read_journal(workspace.path(), run_id);
        shapes.push(
            events
                .iter()
                .map(|e| {
                    let mut value = serde_json::to_value(e).unwrap();
                    value.as_object_mut().unwrap().remove("timestamp");
                    // Invocation ids are opaque tokens; drop them.
                    if let Some(payload) = value["payload"].as_object_mut() {
                        payload.remove("llm_invocation_ref");
                        payload.remove("execution_ref");
                    }
                    value
                })
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(shapes[0], shapes[1]);
}
