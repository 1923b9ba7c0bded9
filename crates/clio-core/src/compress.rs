// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::json;

use clio_model::{Message, Role};

use crate::jsonutil::utf8_preview;

/// Pluggable summarizer for truncated history.
///
/// Implementations receive the dropped messages and the preserved original
/// task, and return a single synthetic assistant message that stands in for
/// them.  The `_metadata.compressed_tokens` annotation on the result is
/// advisory only — the validator re-estimates the summary itself.
#[async_trait]
pub trait Compressor: Send + Sync {
    async fn compress(
        &self,
        dropped: &[Message],
        original_task: Option<&str>,
    ) -> anyhow::Result<Message>;
}

/// Byte budget for the flattened transcript inside the summary message.
const DIGEST_CAP_BYTES: usize = 4_000;

/// Deterministic fallback compressor: flattens the dropped conversation into
/// a role-prefixed digest without any model call.  Always succeeds, so
/// truncation never depends on the network.
pub struct TranscriptCompressor;

#[async_trait]
impl Compressor for TranscriptCompressor {
    async fn compress(
        &self,
        dropped: &[Message],
        original_task: Option<&str>,
    ) -> anyhow::Result<Message> {
        let transcript = serialize_history(dropped);
        let digest = utf8_preview(&transcript, DIGEST_CAP_BYTES);

        let mut content = format!(
            "[Earlier context compacted: {} messages were summarized to free \
             context space.]\n",
            dropped.len()
        );
        if let Some(task) = original_task {
            content.push_str(&format!("Original task: {}\n", utf8_preview(task, 400)));
        }
        content.push_str(&digest);

        let estimated = (content.len() as f64 / 4.0).ceil() as u64;
        let mut msg = Message::assistant(content);
        msg.metadata = Some(json!({
            "compressed_messages": dropped.len(),
            "compressed_tokens": estimated,
        }));
        Ok(msg)
    }
}

/// Flatten messages into plain text: one `Role: text` paragraph each, with
/// tool calls and results rendered inline.
fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            let mut text = m.content.clone();
            if let Some(calls) = &m.tool_calls {
                for c in calls {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(&format!("[tool_call: {}({})]", c.name, c.arguments_json()));
                }
            }
            if m.role == Role::Tool {
                text = format!("[tool_result: {}]", utf8_preview(&text, 300));
            }
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
