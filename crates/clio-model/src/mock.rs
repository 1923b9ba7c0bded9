// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::json;

use crate::{
    error::ProviderError,
    provider::{EventStream, Provider, ProviderRequest},
    Message, Role, StreamEvent, ToolSchema,
};

/// Deterministic mock provider for tests.  Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![]
    }

    fn build_request(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
    ) -> Result<ProviderRequest, ProviderError> {
        Ok(ProviderRequest {
            url: "mock://complete".into(),
            method: "POST".into(),
            headers: vec![],
            body: json!({ "message_count": messages.len() }),
        })
    }

    fn parse_stream_line(&self, _line: &str) -> Option<Result<StreamEvent, ProviderError>> {
        None
    }

    async fn open_stream(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
    ) -> Result<EventStream, ProviderError> {
        let reply = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".into());

        let events: Vec<Result<StreamEvent, ProviderError>> = vec![
            Ok(StreamEvent::Text(format!("MOCK: {reply}"))),
            Ok(StreamEvent::Usage { input_tokens: 10, output_tokens: 10 }),
            Ok(StreamEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted provider.  Each `open_stream` call pops the next event
/// script from the front of the queue, so tests can specify exact event
/// sequences — including fragmented tool calls — without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamEvent>>>>,
    /// The messages and tools from the most recent request, for inspection.
    pub last_request: Arc<Mutex<Option<(Vec<Message>, Vec<ToolSchema>)>>>,
    /// Number of `open_stream` calls made so far.
    pub calls: Arc<Mutex<u32>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let r = reply.into();
        Self::new(vec![vec![
            StreamEvent::Text(r),
            StreamEvent::Usage { input_tokens: 5, output_tokens: 5 },
            StreamEvent::Done,
        ]])
    }

    /// Provider that emits one fragmented tool call, then a text reply on the
    /// following request.  The fragmentation (start + two argument chunks)
    /// exercises the accumulator the same way real providers do.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        let args = args_json.into();
        let split = args.len() / 2;
        Self::new(vec![
            vec![
                StreamEvent::ToolStart {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                },
                StreamEvent::ToolArgs { index: 0, fragment: args[..split].to_string() },
                StreamEvent::ToolArgs { index: 0, fragment: args[split..].to_string() },
                StreamEvent::Stop(crate::StopReason::ToolCalls),
                StreamEvent::Done,
            ],
            vec![StreamEvent::Text(final_text.into()), StreamEvent::Done],
        ])
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![]
    }

    fn build_request(
        &self,
        _messages: &[Message],
        _tools: &[ToolSchema],
    ) -> Result<ProviderRequest, ProviderError> {
        Ok(ProviderRequest {
            url: "mock://scripted".into(),
            method: "POST".into(),
            headers: vec![],
            body: serde_json::Value::Null,
        })
    }

    fn parse_stream_line(&self, _line: &str) -> Option<Result<StreamEvent, ProviderError>> {
        None
    }

    async fn open_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<EventStream, ProviderError> {
        *self.last_request.lock().unwrap() = Some((messages.to_vec(), tools.to_vec()));
        *self.calls.lock().unwrap() += 1;
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![StreamEvent::Text("[no more scripts]".into()), StreamEvent::Done]
            } else {
                scripts.remove(0)
            }
        };
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
