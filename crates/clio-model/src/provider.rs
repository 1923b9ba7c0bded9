// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::{
    capabilities::{self, CapabilityRecord},
    error::ProviderError,
    sse::LineBuffer,
    Message, StopReason, StreamEvent, ToolSchema,
};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// A fully-built HTTP request for one completion, before it is sent.
///
/// Kept as plain data so request construction can be unit-tested without any
/// network access.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Model identifier as reported to users and the capability table.
    fn model_name(&self) -> &str;

    /// Endpoint base URL, when one is configured.  Used by the validator's
    /// local-endpoint heuristic.
    fn base_url(&self) -> Option<&str> {
        None
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn supports_tools(&self) -> bool {
        true
    }

    /// Headers attached to every request (auth, API version, extras).
    fn headers(&self) -> Vec<(String, String)>;

    /// Build the complete streaming request for the given conversation.
    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<ProviderRequest, ProviderError>;

    /// Decode one complete stream line into an event.
    ///
    /// Returns `None` for lines that carry no event (keep-alives, comments,
    /// unparseable data — the latter are logged and skipped, they never end
    /// the stream).
    fn parse_stream_line(&self, line: &str) -> Option<Result<StreamEvent, ProviderError>>;

    /// Map a provider-reported finish reason onto the canonical set.
    fn stop_reason(&self, raw: &str) -> StopReason {
        default_stop_reason(raw)
    }

    /// Capability record for the configured model, when the static table
    /// knows it.
    fn capabilities(&self) -> Option<CapabilityRecord> {
        capabilities::lookup(self.name(), self.model_name())
    }

    /// Open the streaming completion.  The returned stream yields decoded
    /// events until a terminal `Done` / `Stop` / error.
    async fn open_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<EventStream, ProviderError>;
}

/// Shared finish-reason mapping across the OpenAI / Anthropic / Gemini
/// vocabularies.
pub(crate) fn default_stop_reason(raw: &str) -> StopReason {
    match raw {
        "stop" | "end_turn" | "STOP" | "FINISH_REASON_STOP" => StopReason::Stop,
        "tool_calls" | "tool_use" | "function_call" => StopReason::ToolCalls,
        "length" | "max_tokens" | "MAX_TOKENS" => StopReason::Length,
        "content_filter" | "SAFETY" | "RECITATION" => StopReason::ContentFilter,
        _ => StopReason::Error,
    }
}

/// Send `req` and decode its SSE body line-by-line with `parse`.
///
/// Status handling: non-success responses become [`ProviderError::Http`]
/// before any stream is returned, so retry classification happens on the
/// status code.  Mid-stream transport failures and idle timeouts surface as
/// stream items.
pub(crate) async fn open_sse_stream(
    client: &reqwest::Client,
    req: ProviderRequest,
    idle_timeout_secs: u64,
    provider: &'static str,
    parse: fn(&str) -> Option<Result<StreamEvent, ProviderError>>,
) -> Result<EventStream, ProviderError> {
    let mut http = match req.method.as_str() {
        "GET" => client.get(&req.url),
        _ => client.post(&req.url),
    };
    for (name, value) in &req.headers {
        http = http.header(name.as_str(), value.as_str());
    }
    if !req.body.is_null() {
        http = http.json(&req.body);
    }

    let resp = http.send().await?;
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            provider: provider.to_string(),
            status,
            body,
        });
    }

    let timed = tokio_stream::StreamExt::timeout(
        resp.bytes_stream(),
        Duration::from_secs(idle_timeout_secs),
    );
    let events = timed
        .scan(LineBuffer::new(), move |buf, item| {
            let out: Vec<Result<StreamEvent, ProviderError>> = match item {
                Ok(Ok(chunk)) => buf
                    .push(&chunk)
                    .into_iter()
                    .filter_map(|line| parse(&line))
                    .collect(),
                Ok(Err(e)) => vec![Err(ProviderError::Network(e))],
                Err(_elapsed) => vec![Err(ProviderError::IdleTimeout(idle_timeout_secs))],
            };
            std::future::ready(Some(out))
        })
        .flat_map(futures::stream::iter);

    Ok(Box::pin(events))
}
