// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
//! Google Gemini driver — Generative Language API.
//!
//! Endpoint pattern:
//! `POST {base}/v1beta/models/{model}:streamGenerateContent?alt=sse`.
//! Gemini has no `assistant`/`tool` roles: assistant turns are `model`, tool
//! results ride on a `user` turn as `functionResponse` parts, and responses
//! are matched to calls by function *name*, not id.  Function calls always
//! arrive whole in one chunk, so the driver emits single `ToolEnd` events.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::{
    error::ProviderError,
    provider::{default_stop_reason, open_sse_stream, EventStream, Provider, ProviderRequest},
    sse,
    Message, Role, StreamEvent, ToolSchema,
};

pub struct GoogleProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    idle_timeout_secs: u64,
    client: reqwest::Client,
}

impl GoogleProvider {
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
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".into()),
            max_tokens: max_tokens.unwrap_or(8192),
            temperature: temperature.unwrap_or(0.2),
            idle_timeout_secs,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn base_url(&self) -> Option<&str> {
        Some(&self.base_url)
    }

    fn headers(&self) -> Vec<(String, String)> {
        match &self.api_key {
            Some(key) => vec![("x-goog-api-key".to_string(), key.clone())],
            None => vec![],
        }
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ProviderRequest, ProviderError> {
        if self.api_key.is_none() {
            return Err(ProviderError::MissingKey("GEMINI_API_KEY".into()));
        }

        let (system_parts, contents) = convert_messages(messages);

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": self.max_tokens,
                "temperature": self.temperature,
            }
        });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({ "parts": system_parts });
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        Ok(ProviderRequest {
            url: format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url.trim_end_matches('/'),
                self.model,
            ),
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
        tracing::debug!(model = %self.model, "sending gemini request");
        open_sse_stream(&self.client, req, self.idle_timeout_secs, "google", parse_line).await
    }
}

/// Convert canonical messages to Gemini `systemInstruction` parts + `contents`.
///
/// Order and call↔result pairing are preserved: each tool result becomes a
/// `user` turn with a `functionResponse` part whose `name` is resolved from
/// the requesting call (falling back to the opaque id when unknown).
pub(crate) fn convert_messages(messages: &[Message]) -> (Vec<Value>, Vec<Value>) {
    // Gemini matches responses to calls by function name, so map ids first.
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    for m in messages {
        if let Some(calls) = &m.tool_calls {
            for c in calls {
                call_names.insert(c.id.as_str(), c.name.as_str());
            }
        }
    }

    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for m in messages {
        match m.role {
            Role::System => system_parts.push(json!({ "text": m.content })),
            Role::User => {
                contents.push(json!({ "role": "user", "parts": [{ "text": m.content }] }));
            }
            Role::Assistant => {
                let mut parts: Vec<Value> = Vec::new();
                if !m.content.is_empty() {
                    parts.push(json!({ "text": m.content }));
                }
                if let Some(calls) = &m.tool_calls {
                    for c in calls {
                        parts.push(json!({
                            "functionCall": { "name": c.name, "args": c.arguments }
                        }));
                    }
                }
                if parts.is_empty() {
                    parts.push(json!({ "text": "" }));
                }
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            Role::Tool => {
                let id = m.tool_call_id.as_deref().unwrap_or("");
                let fn_name = call_names.get(id).copied().unwrap_or(id);
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": fn_name,
                            "response": { "output": m.content },
                        }
                    }]
                }));
            }
        }
    }

    (system_parts, contents)
}

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

    if let Some(meta) = v.get("usageMetadata") {
        return Some(Ok(StreamEvent::Usage {
            input_tokens: meta["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            output_tokens: meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
        }));
    }

    let candidate = &v["candidates"][0];
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if part.get("thought").and_then(|t| t.as_bool()) == Some(true) {
                if let Some(text) = part["text"].as_str() {
                    return Some(Ok(StreamEvent::Thinking(text.to_string())));
                }
            }
            // Whole function call in one part; the call id is the function
            // name (Gemini correlates responses by name, not id).
            if let Some(fc) = part.get("functionCall") {
                let name = fc["name"].as_str().unwrap_or("").to_string();
                let arguments = serde_json::to_string(&fc["args"]).unwrap_or_default();
                return Some(Ok(StreamEvent::ToolEnd {
                    index: 0,
                    id: name.clone(),
                    name,
                    arguments,
                }));
            }
            if let Some(text) = part["text"].as_str() {
                if !text.is_empty() {
                    return Some(Ok(StreamEvent::Text(text.to_string())));
                }
            }
        }
    }

    if let Some(reason) = candidate["finishReason"].as_str() {
        return Some(Ok(StreamEvent::Stop(default_stop_reason(reason))));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StopReason, ToolCall};
    use serde_json::json;

    fn provider() -> GoogleProvider {
        GoogleProvider::new(
            "gemini-2.5-pro".into(),
            Some("test-key".into()),
            None,
            Some(4096),
            Some(0.0),
            300,
        )
    }

    fn parse(line: &str) -> Option<StreamEvent> {
        parse_line(line).map(|r| r.unwrap())
    }

    // ── Request building ──────────────────────────────────────────────────────

    #[test]
    fn url_targets_stream_generate_content_with_sse() {
        let req = provider().build_request(&[Message::user("hi")], &[]).unwrap();
        assert!(req.url.contains("models/gemini-2.5-pro:streamGenerateContent"));
        assert!(req.url.ends_with("alt=sse"));
    }

    #[test]
    fn api_key_sent_as_goog_header() {
        let req = provider().build_request(&[Message::user("hi")], &[]).unwrap();
        assert!(req.headers.iter().any(|(k, v)| k == "x-goog-api-key" && v == "test-key"));
    }

    #[test]
    fn missing_key_is_error() {
        let p = GoogleProvider::new("m".into(), None, None, None, None, 300);
        assert!(matches!(
            p.build_request(&[Message::user("hi")], &[]).unwrap_err(),
            ProviderError::MissingKey(_)
        ));
    }

    #[test]
    fn tools_become_function_declarations() {
        let tools = vec![ToolSchema {
            name: "file_operations".into(),
            description: "d".into(),
            parameters: json!({"type":"object"}),
        }];
        let req = provider().build_request(&[Message::user("hi")], &tools).unwrap();
        assert_eq!(
            req.body["tools"][0]["functionDeclarations"][0]["name"],
            "file_operations"
        );
    }

    // ── Message conversion (role translation) ─────────────────────────────────

    #[test]
    fn full_conversation_translates_roles_and_pairing() {
        // system, user, assistant(tool_calls=[x]), tool(x), assistant
        //   → systemInstruction + [user, model(functionCall), user(functionResponse), model]
        let msgs = vec![
            Message::system("be brief"),
            Message::user("list files"),
            Message::assistant_with_calls(
                "",
                vec![ToolCall::new("x", "file_operations", json!({"operation":"list_dir"}))],
            ),
            Message::tool_result("x", "a.txt"),
            Message::assistant("there is one file"),
        ];
        let (system_parts, contents) = convert_messages(&msgs);

        assert_eq!(system_parts[0]["text"], "be brief");
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "list files");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "file_operations");
        assert_eq!(contents[2]["role"], "user");
        let resp = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(resp["name"], "file_operations", "matched by name, not id");
        assert_eq!(resp["response"]["output"], "a.txt");
        assert_eq!(contents[3]["role"], "model");
        assert_eq!(contents[3]["parts"][0]["text"], "there is one file");
    }

    #[test]
    fn unmatched_tool_result_falls_back_to_id() {
        let (_, contents) = convert_messages(&[Message::tool_result("orphan_id", "out")]);
        assert_eq!(
            contents[0]["parts"][0]["functionResponse"]["name"],
            "orphan_id"
        );
    }

    #[test]
    fn assistant_text_and_call_share_one_model_turn() {
        let m = Message::assistant_with_calls(
            "checking",
            vec![ToolCall::new("c", "t", json!({}))],
        );
        let (_, contents) = convert_messages(&[m]);
        let parts = contents[0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "checking");
        assert!(parts[1]["functionCall"].is_object());
    }

    // ── Stream parsing ────────────────────────────────────────────────────────

    #[test]
    fn text_part_parsed() {
        let ev = parse(r#"data: {"candidates":[{"content":{"parts":[{"text":"hello"}]}}]}"#)
            .unwrap();
        assert_eq!(ev, StreamEvent::Text("hello".into()));
    }

    #[test]
    fn thought_part_is_thinking() {
        let ev = parse(
            r#"data: {"candidates":[{"content":{"parts":[{"text":"hmm","thought":true}]}}]}"#,
        )
        .unwrap();
        assert_eq!(ev, StreamEvent::Thinking("hmm".into()));
    }

    #[test]
    fn function_call_is_complete_tool_end() {
        let ev = parse(
            r#"data: {"candidates":[{"content":{"parts":[{"functionCall":{"name":"shell","args":{"command":"ls"}}}]}}]}"#,
        )
        .unwrap();
        match ev {
            StreamEvent::ToolEnd { id, name, arguments, .. } => {
                assert_eq!(id, "shell", "id falls back to the function name");
                assert_eq!(name, "shell");
                assert_eq!(arguments, r#"{"command":"ls"}"#);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn usage_metadata_parsed() {
        let ev = parse(
            r#"data: {"usageMetadata":{"promptTokenCount":100,"candidatesTokenCount":50}}"#,
        )
        .unwrap();
        assert_eq!(ev, StreamEvent::Usage { input_tokens: 100, output_tokens: 50 });
    }

    #[test]
    fn finish_reason_without_parts_is_stop() {
        let ev = parse(r#"data: {"candidates":[{"finishReason":"STOP"}]}"#).unwrap();
        assert_eq!(ev, StreamEvent::Stop(StopReason::Stop));
    }

    #[test]
    fn safety_finish_reason_is_content_filter() {
        let ev = parse(r#"data: {"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert_eq!(ev, StreamEvent::Stop(StopReason::ContentFilter));
    }

    #[test]
    fn malformed_line_skipped() {
        assert!(parse_line("data: {broken").is_none());
    }
}
