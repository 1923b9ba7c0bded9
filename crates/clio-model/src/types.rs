// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Message types ────────────────────────────────────────────────────────────

/// Messages that score at or above this are never dropped by truncation.
pub const PRESERVE_IMPORTANCE: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single tool invocation requested by the model.
///
/// `arguments` is kept structured; [`ToolCall::arguments_json`] produces the
/// canonical textual form used on the wire and for token accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self { id: id.into(), name: name.into(), arguments }
    }

    /// Canonical JSON encoding of the arguments object.
    pub fn arguments_json(&self) -> String {
        serde_json::to_string(&self.arguments).unwrap_or_else(|_| "{}".to_string())
    }
}

/// One message in the conversation history, in the canonical OpenAI-style
/// shape that every provider adapter converts from and to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Present only on assistant messages that request tool invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Present iff `role == Tool`; links the result to the requesting call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Messages with `_importance >= 10.0` survive truncation verbatim.
    #[serde(
        default,
        rename = "_importance",
        skip_serializing_if = "Option::is_none"
    )]
    pub importance: Option<f32>,
    /// Auxiliary annotations (e.g. compression statistics).  Advisory only;
    /// never sent to providers.
    #[serde(
        default,
        rename = "_metadata",
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata: Option<Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            importance: None,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::base(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::base(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::base(Role::Assistant, text)
    }

    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut m = Self::base(Role::Assistant, text);
        if !calls.is_empty() {
            m.tool_calls = Some(calls);
        }
        m
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::base(Role::Tool, content);
        m.tool_call_id = Some(call_id.into());
        m
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    /// True when truncation must keep this message verbatim.
    pub fn is_preserved(&self) -> bool {
        self.importance.map_or(false, |i| i >= PRESERVE_IMPORTANCE)
    }

    /// Ids of the tool calls carried by this message (empty for non-callers).
    pub fn tool_call_ids(&self) -> Vec<&str> {
        self.tool_calls
            .as_deref()
            .map(|calls| calls.iter().map(|c| c.id.as_str()).collect())
            .unwrap_or_default()
    }

    /// Prompt-cost estimate in tokens at the given chars-per-token ratio:
    /// content plus the canonical encoding of each tool call, plus a flat
    /// overhead of 50 for tool-role messages.
    pub fn estimated_tokens(&self, ratio: f64) -> usize {
        let ratio = if ratio > 0.0 { ratio } else { 2.5 };
        let mut tokens = (self.content.len() as f64 / ratio).ceil() as usize;
        if let Some(calls) = &self.tool_calls {
            for call in calls {
                let encoded = serde_json::to_string(call)
                    .map(|s| s.len())
                    .unwrap_or(call.name.len() + call.arguments_json().len());
                tokens += (encoded as f64 / ratio).ceil() as usize;
            }
        }
        if self.role == Role::Tool {
            tokens += 50;
        }
        tokens
    }
}

// ─── Tool schemas ─────────────────────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: Value,
}

// ─── Stream events ────────────────────────────────────────────────────────────

/// Provider-reported reason a completion stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Error,
}

/// A single event decoded from a provider stream.
///
/// Between a `ToolStart` and the matching `ToolEnd`, `ToolArgs` fragments for
/// the same index concatenate to the serialized arguments blob.  Providers
/// that deliver a whole call in one chunk emit a single `ToolEnd` with
/// complete arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text(String),
    Thinking(String),
    ToolStart {
        index: u32,
        id: String,
        name: String,
    },
    ToolArgs {
        index: u32,
        fragment: String,
    },
    ToolEnd {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    Stop(StopReason),
    Done,
    Error(String),
}

/// Token usage from one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
