// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
//! Shared driver for OpenAI-compatible chat completion APIs.
//!
//! The hosted OpenAI endpoint, gateways such as OpenRouter, and local servers
//! (Ollama, LM Studio, vLLM) all speak the same `/chat/completions` SSE wire
//! format; this one implementation covers them, configured per driver with
//! its URL, auth style, and extra headers.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    error::ProviderError,
    provider::{open_sse_stream, EventStream, Provider, ProviderRequest},
    sse,
    Message, Role, StreamEvent, ToolSchema,
};

/// How the API key is attached to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` — hosted providers.
    Bearer,
    /// No authentication header — local servers.
    None,
}

pub struct OpenAiCompatProvider {
    driver_name: &'static str,
    model: String,
    api_key: Option<String>,
    key_env_hint: String,
    base_url: String,
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    extra_headers: Vec<(String, String)>,
    auth_style: AuthStyle,
    idle_timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver_name: &'static str,
        model: String,
        api_key: Option<String>,
        key_env_hint: impl Into<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        extra_headers: Vec<(String, String)>,
        auth_style: AuthStyle,
        idle_timeout_secs: u64,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            driver_name,
            model,
            api_key,
            key_env_hint: key_env_hint.into(),
            base_url: base.to_string(),
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            extra_headers,
            auth_style,
            idle_timeout_secs,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.driver_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn base_url(&self) -> Option<&str> {
        Some(&self.base_url)
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if self.auth_style == AuthStyle::Bearer {
            if let Some(key) = &self.api_key {
                headers.push(("Authorization".to_string(), format!("Bearer {key}")));
            }
        }
        headers.extend(self.extra_headers.iter().cloned());
        headers
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ProviderRequest, ProviderError> {
        if self.auth_style == AuthStyle::Bearer && self.api_key.is_none() {
            return Err(ProviderError::MissingKey(self.key_env_hint.clone()));
        }

        // OpenAI's newer models take "max_completion_tokens"; every other
        // compatible server still expects "max_tokens".
        let max_tokens_key = if self.driver_name == "openai" {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        // Reasoning models reject an explicit temperature.
        let use_temperature = !(self.driver_name == "openai"
            && (self.model.starts_with("o1")
                || self.model.starts_with("o3")
                || self.model.starts_with("o4")));

        let mut body = json!({
            "model": self.model,
            "messages": convert_messages(messages),
            "stream": true,
            max_tokens_key: self.max_tokens,
            "stream_options": { "include_usage": true },
        });
        if use_temperature {
            body["temperature"] = json!(self.temperature);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools.iter().map(convert_tool).collect::<Vec<_>>());
        }

        Ok(ProviderRequest {
            url: self.chat_url.clone(),
            method: "POST".to_string(),
            headers: self.headers(),
            body,
        })
    }

    fn parse_stream_line(&self, line: &str) -> Option<Result<StreamEvent, ProviderError>> {
        parse_line(line)
    }

    async fn open_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<EventStream, ProviderError> {
        let req = self.build_request(messages, tools)?;
        tracing::debug!(
            driver = self.driver_name,
            model = %self.model,
            message_count = messages.len(),
            tool_count = tools.len(),
            "sending completion request"
        );
        open_sse_stream(
            &self.client,
            req,
            self.idle_timeout_secs,
            self.driver_name,
            parse_line,
        )
        .await
    }
}

fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert canonical messages to the OpenAI wire array.
///
/// The canonical shape is already OpenAI-flavoured, so this is mostly a
/// field-for-field projection; internal metadata (`_importance`, timestamps)
/// is stripped.
pub(crate) fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.as_deref().unwrap_or(""),
                "content": m.content,
            }),
            Role::Assistant if m.tool_calls.is_some() => {
                let calls: Vec<Value> = m
                    .tool_calls
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {
                                "name": c.name,
                                "arguments": c.arguments_json(),
                            }
                        })
                    })
                    .collect();
                let mut v = json!({ "role": "assistant", "tool_calls": calls });
                if !m.content.is_empty() {
                    v["content"] = json!(m.content);
                }
                v
            }
            role => json!({ "role": role_str(role), "content": m.content }),
        })
        .collect()
}

pub(crate) fn convert_tool(tool: &ToolSchema) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// Decode one SSE line into a stream event.
///
/// Unparseable data lines are logged and skipped (`None`) so a single mangled
/// chunk never ends the stream.
pub(crate) fn parse_line(line: &str) -> Option<Result<StreamEvent, ProviderError>> {
    let data = sse::data_payload(line)?;
    if data == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, line, "skipping malformed stream line");
            return None;
        }
    };

    // Usage-only chunk (stream_options.include_usage).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return Some(Ok(StreamEvent::Usage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        }));
    }

    let choice = &v["choices"][0];
    let delta = &choice["delta"];

    // Tool-call delta.  The first chunk for a call carries id + name; later
    // chunks carry argument fragments routed by index.  Servers that do not
    // stream arguments deliver the whole call in one chunk.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        let index = tc["index"].as_u64().unwrap_or(0) as u32;
        let id = tc["id"].as_str().unwrap_or("").to_string();
        let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
        let args = tc["function"]["arguments"].as_str().unwrap_or("").to_string();
        let has_identity = !id.is_empty() || !name.is_empty();
        return Some(Ok(if has_identity && args.is_empty() {
            StreamEvent::ToolStart { index, id, name }
        } else if has_identity {
            StreamEvent::ToolEnd { index, id, name, arguments: args }
        } else {
            StreamEvent::ToolArgs { index, fragment: args }
        }));
    }

    // Chain-of-thought text: `reasoning_content` (llama.cpp, DeepSeek) or
    // `reasoning` (OpenRouter).
    let thinking = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(t) = thinking {
        if !t.is_empty() {
            return Some(Ok(StreamEvent::Thinking(t.to_string())));
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return Some(Ok(StreamEvent::Text(text.to_string())));
        }
    }

    if let Some(reason) = choice["finish_reason"].as_str() {
        return Some(Ok(StreamEvent::Stop(crate::provider::default_stop_reason(
            reason,
        ))));
    }

    None
}
