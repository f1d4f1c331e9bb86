//! Conversation rebuild from the journal.
//!
//! The journal is the only memory the engine has, so the conversation the
//! model sees is reconstructed from events on every iteration: the task
//! from RUN_START opens as a user message, each THOUGHT becomes an
//! assistant message carrying the ACTION_REQUESTs that followed it, and
//! each request is answered by a `tool` message holding the matching
//! result's observation.

use std::collections::HashMap;

use delta_types::{ChatMessage, EventPayload, JournalEvent, ToolCallPayload};

/// Observation shown for a request that has no result yet. Can only
/// happen for an `ask_human` that paused the run.
const PENDING_OBSERVATION: &str = "(pending)";

struct ThoughtGroup<'a> {
    content: &'a str,
    requests: Vec<&'a JournalEvent>,
}

/// Rebuild the assistant/tool message sequence from journal events.
///
/// With `max_iterations = Some(n)`, only the last `n` THOUGHT groups are
/// retained; the opening user task always survives the trim.
pub fn rebuild_conversation(
    events: &[JournalEvent],
    max_iterations: Option<u32>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    if let Some(task) = events.iter().find_map(|e| match &e.payload {
        EventPayload::RunStart { task, .. } => Some(task),
        _ => None,
    }) {
        messages.push(ChatMessage::user(task.clone()));
    }

    // Observations by action_id. Requests reference results by id, so
    // order of appearance does not matter here.
    let mut observations: HashMap<&str, &str> = HashMap::new();
    for event in events {
        if let EventPayload::ActionResult {
            action_id,
            observation_content,
            ..
        } = &event.payload
        {
            observations.insert(action_id, observation_content);
        }
    }

    // Group each THOUGHT with the requests that follow it (up to the
    // next THOUGHT).
    let mut groups: Vec<ThoughtGroup<'_>> = Vec::new();
    for event in events {
        match &event.payload {
            EventPayload::Thought { content, .. } => groups.push(ThoughtGroup {
                content,
                requests: Vec::new(),
            }),
            EventPayload::ActionRequest { .. } => {
                if let Some(group) = groups.last_mut() {
                    group.requests.push(event);
                }
            }
            _ => {}
        }
    }

    let skip = match max_iterations {
        Some(n) => groups.len().saturating_sub(n as usize),
        None => 0,
    };

    for group in &groups[skip..] {
        let tool_calls: Vec<ToolCallPayload> = group
            .requests
            .iter()
            .filter_map(|event| match &event.payload {
                EventPayload::ActionRequest {
                    action_id,
                    tool_name,
                    tool_args,
                    ..
                } => Some(ToolCallPayload::function(action_id, tool_name, tool_args)),
                _ => None,
            })
            .collect();

        let content = if group.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(group.content.to_string())
        };
        messages.push(ChatMessage::assistant(content, tool_calls));

        for request in &group.requests {
            if let EventPayload::ActionRequest { action_id, .. } = &request.payload {
                let observation = observations
                    .get(action_id.as_str())
                    .copied()
                    .unwrap_or(PENDING_OBSERVATION);
                messages.push(ChatMessage::tool(action_id, observation));
            }
        }
    }

    messages
}
