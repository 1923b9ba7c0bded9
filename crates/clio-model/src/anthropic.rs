// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    error::ProviderError,
    provider::{default_stop_reason, open_sse_stream, EventStream, Provider, ProviderRequest},
    sse,
    Message, Role, StreamEvent, ToolSchema,
};

pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    idle_timeout_secs: u64,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        idle_timeout_secs: u64,
    ) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".into()),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            idle_timeout_secs,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn base_url(&self) -> Option<&str> {
        Some(&self.base_url)
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(
            "anthropic-version".to_string(),
            "2023-06-01".to_string(),
        )];
        if let Some(key) = &self.api_key {
            headers.push(("x-api-key".to_string(), key.clone()));
        }
        headers
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ProviderRequest, ProviderError> {
        if self.api_key.is_none() {
            return Err(ProviderError::MissingKey("ANTHROPIC_API_KEY".into()));
        }

        let (system_text, wire_messages) = convert_messages(messages);

        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": true,
        });
        if !system_text.is_empty() {
            body["system"] = json!(system_text);
        }
        if !tools.is_empty() {
            let wire_tools: Vec<Value> = tools.iter().map(convert_tool).collect();
            body["tools"] = json!(wire_tools);
        }

        Ok(ProviderRequest {
            url: format!("{}/v1/messages", self.base_url.trim_end_matches('/')),
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
        tracing::debug!(model = %self.model, message_count = messages.len(), "sending anthropic request");
        open_sse_stream(&self.client, req, self.idle_timeout_secs, "anthropic", parse_line).await
    }
}

fn convert_tool(tool: &ToolSchema) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

/// Convert canonical messages to the Anthropic wire format.
///
/// Returns `(system_text, conversation)`.  System messages are not
/// conversation turns here: consecutive system messages are concatenated in
/// order with a blank line and sent as the top-level `system` field.
/// Assistant tool calls become `tool_use` content blocks; tool results become
/// `tool_result` blocks on a user turn, preserving order and pairing.
pub(crate) fn convert_messages(messages: &[Message]) -> (String, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        match m.role {
            Role::System => system_parts.push(&m.content),
            Role::Assistant => {
                if let Some(calls) = &m.tool_calls {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !m.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": m.content }));
                    }
                    for call in calls {
                        // tool_use.id must match ^[a-zA-Z0-9_-]+$; an empty id
                        // would draw a 400 on this request, so substitute a
                        // stable fallback.
                        let safe_id = if call.id.is_empty() {
                            warn!(tool_name = %call.name, "empty tool_call id; substituting fallback");
                            "tc_fallback".to_string()
                        } else {
                            call.id.clone()
                        };
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": safe_id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    out.push(json!({ "role": "assistant", "content": blocks }));
                } else {
                    out.push(json!({ "role": "assistant", "content": m.content }));
                }
            }
            Role::Tool => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.as_deref().unwrap_or(""),
                        "content": m.content,
                    }]
                }));
            }
            Role::User => {
                out.push(json!({ "role": "user", "content": m.content }));
            }
        }
    }

    (system_parts.join("\n\n"), out)
}

pub(crate) fn parse_line(line: &str) -> Option<Result<StreamEvent, ProviderError>> {
    let data = sse::data_payload(line)?;
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, line, "skipping malformed stream line");
            return None;
        }
    };

    match v["type"].as_str().unwrap_or("") {
        "content_block_start" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                Some(Ok(StreamEvent::ToolStart {
                    index,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                }))
            } else {
                None
            }
        }
        "content_block_delta" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("");
                    (!text.is_empty()).then(|| Ok(StreamEvent::Text(text.to_string())))
                }
                "input_json_delta" => Some(Ok(StreamEvent::ToolArgs {
                    index,
                    fragment: delta["partial_json"].as_str().unwrap_or("").to_string(),
                })),
                "thinking_delta" => {
                    let thinking = delta["thinking"].as_str().unwrap_or("");
                    (!thinking.is_empty()).then(|| Ok(StreamEvent::Thinking(thinking.to_string())))
                }
                // The signature blob at the end of a thinking block is not
                // human-readable and must never surface as text.
                "signature_delta" => None,
                _ => None,
            }
        }
        "content_block_stop" => {
            let index = v["index"].as_u64().unwrap_or(0) as u32;
            Some(Ok(StreamEvent::ToolEnd {
                index,
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            }))
        }
        "message_delta" => {
            if let Some(reason) = v["delta"]["stop_reason"].as_str() {
                return Some(Ok(StreamEvent::Stop(default_stop_reason(reason))));
            }
            if let Some(usage) = v.get("usage") {
                return Some(Ok(StreamEvent::Usage {
                    input_tokens: 0,
                    output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                }));
            }
            None
        }
        "message_start" => v["message"].get("usage").map(|usage| {
            Ok(StreamEvent::Usage {
                input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: 0,
            })
        }),
        "message_stop" => Some(Ok(StreamEvent::Done)),
        "error" => Some(Ok(StreamEvent::Error(
            v["error"]["message"].as_str().unwrap_or("stream error").to_string(),
        ))),
        _ => None,
    }
}
