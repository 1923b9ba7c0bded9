// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::logger::append_jsonl;

/// One tool invocation, as recorded in `tool_operations_YYYY-MM-DD.log`.
///
/// `output` is what the tool produced; `sent_to_ai` is what actually went
/// into the conversation (differs when the result was spilled or truncated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOpEntry {
    pub timestamp: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub operation: String,
    pub parameters: serde_json::Value,
    pub output: String,
    pub action_description: String,
    pub sent_to_ai: String,
    pub success: bool,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Appender for the per-day tool-operations log.
#[derive(Debug, Clone)]
pub struct ToolOpsLog {
    dir: PathBuf,
    session_id: String,
}

impl ToolOpsLog {
    pub fn new(dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn file_for_today(&self) -> PathBuf {
        self.dir
            .join(format!("tool_operations_{}.log", Utc::now().format("%Y-%m-%d")))
    }

    /// Record one tool call.  The timestamp and session id are filled in here
    /// so callers only describe the call itself.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        tool_call_id: &str,
        tool_name: &str,
        operation: &str,
        parameters: serde_json::Value,
        output: &str,
        action_description: &str,
        sent_to_ai: &str,
        success: bool,
        execution_time_ms: u64,
        error: Option<String>,
    ) {
        let entry = ToolOpEntry {
            timestamp: Utc::now().to_rfc3339(),
            session_id: self.session_id.clone(),
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            operation: operation.to_string(),
            parameters,
            output: output.to_string(),
            action_description: action_description.to_string(),
            sent_to_ai: sent_to_ai.to_string(),
            success,
            execution_time_ms,
            error,
        };
        let value = match serde_json::to_value(&entry) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "tool-op entry not serializable");
                return;
            }
        };
        if let Err(e) = append_jsonl(&self.file_for_today(), &value) {
            tracing::warn!(error = %e, "failed to append tool-op record");
        }
    }
}
