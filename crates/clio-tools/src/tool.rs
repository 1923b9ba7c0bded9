// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation dispatched to an adapter.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Opaque identifier from the model, forwarded verbatim.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
///
/// Failures are data, never an unwind: `is_error` marks a non-fatal failure
/// whose message goes back to the model so the loop can continue.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Trait that every built-in and user-defined tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Parameters that carry filesystem paths, subject to the soft-sandbox
    /// containment check.  Empty for tools with no path surface.
    fn path_params(&self) -> &[&str] {
        &[]
    }
    /// Per-tool timeout override in seconds; `None` uses the executor default.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }
    /// Execute the tool.  Errors are wrapped in [`ToolOutput::err`].
    async fn execute(&self, call: &ToolInvocation) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
