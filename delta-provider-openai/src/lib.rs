#![deny(missing_docs)]
//! OpenAI Chat Completions client.
//!
//! Implements [`delta_types::Provider`]. The request payload arrives as
//! opaque JSON — the engine's `pre_llm_req` hook may have rewritten it —
//! and is sent verbatim, so what lands in the invocation audit is exactly
//! what crossed the wire. Retry and rate limiting are out of scope by
//! design; a failed call is fatal for the iteration and the caller
//! decides what to do.

use async_trait::async_trait;
use delta_types::{
    normalize_tool_arguments, AssistantMessage, ChatOutcome, Provider, ProviderError, TokenUsage,
    ToolInvocation,
};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Chat Completions over `reqwest`.
pub struct OpenAiProvider {
    api_key: String,
    api_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider with the given API key and the default endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Override the endpoint (proxies, compatible servers, tests).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn chat(&self, payload: &serde_json::Value) -> Result<ChatOutcome, ProviderError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(Box::new(e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(Box::new(e)))?;

        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let raw: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let message = parse_assistant_message(&raw)?;
        let usage = raw
            .get("usage")
            .cloned()
            .and_then(|u| serde_json::from_value::<TokenUsage>(u).ok());

        Ok(ChatOutcome {
            message,
            raw_response: raw,
            usage,
        })
    }
}

/// Distill the first choice of a Chat Completions response into an
/// [`AssistantMessage`], normalizing degenerate tool-argument strings.
pub fn parse_assistant_message(raw: &serde_json::Value) -> Result<AssistantMessage, ProviderError> {
    let message = raw
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".into()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(String::from);

    let tool_calls = match message.get("tool_calls").and_then(|t| t.as_array()) {
        Some(calls) => calls
            .iter()
            .map(|call| {
                let id = call
                    .get("id")
                    .and_then(|i| i.as_str())
                    .ok_or_else(|| {
                        ProviderError::InvalidResponse("tool call without id".into())
                    })?
                    .to_string();
                let function = call.get("function").ok_or_else(|| {
                    ProviderError::InvalidResponse("tool call without function".into())
                })?;
                let name = function
                    .get("name")
                    .and_then(|n| n.as_str())
                    .ok_or_else(|| {
                        ProviderError::InvalidResponse("tool call without function name".into())
                    })?
                    .to_string();
                let arguments =
                    normalize_tool_arguments(function.get("arguments").and_then(|a| a.as_str()));
                Ok(ToolInvocation {
                    id,
                    name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?,
        None => Vec::new(),
    };

    Ok(AssistantMessage {
        content,
        tool_calls,
    })
}
