// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolInvocation, ToolOutput};

/// Interactive channel to the human operator.
///
/// The hosting front-end implements this (stdin prompt, editor overlay, …);
/// the tool itself only defines the blocking round-trip.
#[async_trait]
pub trait UserChannel: Send + Sync {
    async fn ask(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Tool that pauses the loop and asks the user a question.
pub struct AskUserTool {
    channel: Arc<dyn UserChannel>,
}

impl AskUserTool {
    pub fn new(channel: Arc<dyn UserChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a question and wait for their reply.\n\
         Use when a decision genuinely requires user input (ambiguous\n\
         requirements, destructive actions, credentials).  Do not use for\n\
         questions you can answer by reading files or running commands."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The question to put to the user"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required parameter 'prompt'"),
        };
        match self.channel.ask(prompt).await {
            Ok(reply) => ToolOutput::ok(&call.id, reply),
            Err(e) => ToolOutput::err(&call.id, format!("user channel error: {e}")),
        }
    }
}
