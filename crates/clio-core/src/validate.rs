// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Message validation and token budgeting.
//!
//! Three operations over the canonical message array:
//! - [`preflight`] — structural diagnostics, no mutation.
//! - [`pair_fix`] — drop orphaned tool results and strip tool calls that
//!   have no matching result, so the pairing invariant holds.
//! - [`validate_and_truncate`] — fit the conversation into the model's
//!   prompt budget, compressing dropped history into a synthetic summary.

use std::collections::{HashMap, HashSet};

use clio_model::{Message, Role, ToolSchema};
use tracing::{debug, warn};

use crate::compress::Compressor;
use crate::jsonutil::canonical_json;

/// Token cost assumed for a tool whose schema fails to encode.
const TOOL_COST_FALLBACK: usize = 600;

/// Fraction of the prompt window held back as slack on top of the explicit
/// response buffer.
const WINDOW_RESERVE_FRACTION: f64 = 0.10;

/// The effective limit never drops below this.
const MIN_EFFECTIVE_TOKENS: usize = 1000;

/// Budget inputs for one truncation pass.
#[derive(Debug, Clone)]
pub struct TruncationParams {
    pub max_prompt_tokens: usize,
    /// Rolling chars-per-token ratio.
    pub token_ratio: f64,
    /// Tokens reserved for the model's reply.
    pub response_buffer: usize,
}

// ─── preflight ────────────────────────────────────────────────────────────────

/// Structural check: duplicate call ids, calls with no result, results with
/// no call.  Returns human-readable diagnostics and never mutates.
pub fn preflight(messages: &[Message]) -> Vec<String> {
    let mut diagnostics = Vec::new();

    // Duplicate ids across all assistant messages.
    let mut seen: HashSet<&str> = HashSet::new();
    for m in messages {
        for id in m.tool_call_ids() {
            if !seen.insert(id) {
                diagnostics.push(format!("duplicate tool_call id: {id}"));
            }
        }
    }

    // Calls without a later matching result.
    for (i, m) in messages.iter().enumerate() {
        for id in m.tool_call_ids() {
            let answered = messages[i + 1..]
                .iter()
                .any(|t| t.role == Role::Tool && t.tool_call_id.as_deref() == Some(id));
            if !answered {
                diagnostics.push(format!("orphaned tool_call: {id} (no matching tool result)"));
            }
        }
    }

    // Results without an earlier matching call.
    for (i, m) in messages.iter().enumerate() {
        if m.role != Role::Tool {
            continue;
        }
        let id = m.tool_call_id.as_deref().unwrap_or("");
        let requested = messages[..i]
            .iter()
            .any(|a| a.tool_call_ids().contains(&id));
        if !requested {
            diagnostics.push(format!("orphaned tool result: {id}"));
        }
    }

    diagnostics
}

// ─── pair_fix ─────────────────────────────────────────────────────────────────

/// Restore the pairing invariant.
///
/// Tool messages whose id no preceding assistant requested are dropped.
/// Assistant tool calls are kept only when a matching (valid) result exists
/// later; an assistant left with no matched calls loses the `tool_calls`
/// field entirely while its text survives.  Idempotent.
pub fn pair_fix(messages: &[Message]) -> Vec<Message> {
    // Pass 1: which tool results are answered by a preceding call?
    let mut valid_result: Vec<bool> = vec![false; messages.len()];
    for (j, m) in messages.iter().enumerate() {
        if m.role != Role::Tool {
            continue;
        }
        let id = m.tool_call_id.as_deref().unwrap_or("");
        valid_result[j] = messages[..j]
            .iter()
            .any(|a| a.tool_call_ids().contains(&id));
    }

    // Pass 2: rebuild, filtering calls against the valid results.
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for (i, m) in messages.iter().enumerate() {
        match m.role {
            Role::Tool => {
                if valid_result[i] {
                    out.push(m.clone());
                } else {
                    warn!(
                        tool_call_id = m.tool_call_id.as_deref().unwrap_or(""),
                        "dropping orphaned tool result"
                    );
                }
            }
            Role::Assistant if m.tool_calls.is_some() => {
                let kept: Vec<_> = m
                    .tool_calls
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .filter(|c| {
                        messages[i + 1..].iter().enumerate().any(|(off, t)| {
                            valid_result[i + 1 + off]
                                && t.tool_call_id.as_deref() == Some(c.id.as_str())
                        })
                    })
                    .cloned()
                    .collect();
                let mut fixed = m.clone();
                if kept.is_empty() {
                    warn!("stripping unanswered tool_calls from assistant message");
                    fixed.tool_calls = None;
                } else {
                    if kept.len() < m.tool_calls.as_deref().unwrap_or_default().len() {
                        warn!("stripping partially unanswered tool_calls");
                    }
                    fixed.tool_calls = Some(kept);
                }
                out.push(fixed);
            }
            _ => out.push(m.clone()),
        }
    }
    out
}

// ─── Token estimation ─────────────────────────────────────────────────────────

/// Estimated prompt cost of a message array.
pub fn estimate_tokens(messages: &[Message], ratio: f64) -> usize {
    messages.iter().map(|m| m.estimated_tokens(ratio)).sum()
}

/// Estimated cost of the tool schemas sent with every request.
pub fn tool_schema_cost(tools: &[ToolSchema], ratio: f64) -> usize {
    let ratio = if ratio > 0.0 { ratio } else { 2.5 };
    tools
        .iter()
        .map(|t| match serde_json::to_value(t) {
            Ok(v) => (canonical_json(&v).len() as f64 / ratio).ceil() as usize,
            Err(_) => TOOL_COST_FALLBACK,
        })
        .sum()
}

/// `effective = max_prompt − tool_cost − ⌊0.10·max_prompt⌋ − response_buffer`,
/// floored at [`MIN_EFFECTIVE_TOKENS`].
pub fn effective_limit(max_prompt: usize, tool_cost: usize, response_buffer: usize) -> usize {
    let reserve = (max_prompt as f64 * WINDOW_RESERVE_FRACTION).floor() as usize;
    max_prompt
        .saturating_sub(tool_cost)
        .saturating_sub(reserve)
        .saturating_sub(response_buffer)
        .max(MIN_EFFECTIVE_TOKENS)
}

// ─── Units ────────────────────────────────────────────────────────────────────

/// A truncation atom: a single message, or an assistant-with-tool_calls plus
/// its contiguous tool results.  Indivisible during truncation.
#[derive(Debug, Clone)]
struct Unit {
    messages: Vec<Message>,
    tokens: usize,
    orphan_tool_result: bool,
}

fn group_units(messages: &[Message], ratio: f64) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let m = &messages[i];
        if m.role == Role::Assistant && m.tool_calls.is_some() {
            let ids: HashSet<&str> = m.tool_call_ids().into_iter().collect();
            let mut group = vec![m.clone()];
            let mut j = i + 1;
            while j < messages.len()
                && messages[j].role == Role::Tool
                && messages[j]
                    .tool_call_id
                    .as_deref()
                    .map(|id| ids.contains(id))
                    .unwrap_or(false)
            {
                group.push(messages[j].clone());
                j += 1;
            }
            let tokens = estimate_tokens(&group, ratio);
            units.push(Unit { messages: group, tokens, orphan_tool_result: false });
            i = j;
        } else {
            let orphan = m.role == Role::Tool;
            units.push(Unit {
                messages: vec![m.clone()],
                tokens: m.estimated_tokens(ratio),
                orphan_tool_result: orphan,
            });
            i += 1;
        }
    }
    units
}

// ─── validate_and_truncate ────────────────────────────────────────────────────

/// Fit `messages` into the prompt budget.
///
/// Under budget the array passes through `pair_fix` untouched.  Over budget,
/// history is grouped into units; the leading system unit and the first
/// preserved user message survive verbatim, the newest units that fit are
/// kept, and everything dropped is compressed into one synthetic assistant
/// summary (dropped silently if compression fails).  Final order:
/// system · summary · first-user · kept units in original order.
pub async fn validate_and_truncate(
    messages: Vec<Message>,
    tools: &[ToolSchema],
    params: &TruncationParams,
    compressor: &dyn Compressor,
) -> Vec<Message> {
    let ratio = params.token_ratio;
    let tool_cost = tool_schema_cost(tools, ratio);
    let effective = effective_limit(params.max_prompt_tokens, tool_cost, params.response_buffer);
    let estimate = estimate_tokens(&messages, ratio);

    if estimate <= effective {
        return pair_fix(&messages);
    }

    debug!(estimate, effective, "prompt over budget; truncating");

    let mut units = group_units(&messages, ratio);

    // Leading system unit.
    let system_unit = if units
        .first()
        .map(|u| u.messages[0].role == Role::System)
        .unwrap_or(false)
    {
        Some(units.remove(0))
    } else {
        None
    };

    // First preserved user unit.
    let first_user_idx = units.iter().position(|u| {
        u.messages.len() == 1 && u.messages[0].role == Role::User && u.messages[0].is_preserved()
    });
    let first_user_unit = first_user_idx.map(|idx| units.remove(idx));

    let mut budget_used = system_unit.as_ref().map(|u| u.tokens).unwrap_or(0)
        + first_user_unit.as_ref().map(|u| u.tokens).unwrap_or(0);

    // Newest to oldest: a unit either fits whole or is dropped whole.  An
    // effective limit at its floor means the tool schemas alone ate the
    // window; nothing beyond the skeleton is worth keeping then.
    let mut keep = vec![false; units.len()];
    if effective > MIN_EFFECTIVE_TOKENS {
        for idx in (0..units.len()).rev() {
            let unit = &units[idx];
            if unit.orphan_tool_result {
                continue;
            }
            if budget_used + unit.tokens <= effective {
                keep[idx] = true;
                budget_used += unit.tokens;
            }
        }
    }

    let dropped: Vec<Message> = units
        .iter()
        .zip(&keep)
        .filter(|(u, &kept)| !kept && !u.orphan_tool_result)
        .flat_map(|(u, _)| u.messages.clone())
        .collect();

    let original_task = first_user_unit
        .as_ref()
        .map(|u| u.messages[0].content.as_str());
    let summary = if dropped.is_empty() {
        None
    } else {
        match compressor.compress(&dropped, original_task).await {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!(error = %e, "history compression failed; dropping without summary");
                None
            }
        }
    };

    let mut out: Vec<Message> = Vec::new();
    if let Some(u) = system_unit {
        out.extend(u.messages);
    }
    if let Some(s) = summary {
        out.push(s);
    }
    if let Some(u) = first_user_unit {
        out.extend(u.messages);
    }
    for (unit, kept) in units.into_iter().zip(keep) {
        if kept {
            out.extend(unit.messages);
        }
    }

    pair_fix(&out)
}

/// Re-key duplicate tool-call ids so every id is unique within the session.
///
/// Providers that derive ids from function names (Gemini) repeat them across
/// turns; the first occurrence keeps the id, later ones get `_2`, `_3`, …
pub fn uniquify_call_id(id: String, seen: &mut HashMap<String, u32>) -> String {
    match seen.get_mut(&id) {
        None => {
            seen.insert(id.clone(), 1);
            id
        }
        Some(count) => {
            *count += 1;
            let fresh = format!("{id}_{count}");
            seen.insert(fresh.clone(), 1);
            fresh
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::TranscriptCompressor;
    use async_trait::async_trait;
    use clio_model::ToolCall;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "execute_command", json!({"command": "ls"}))
    }

    fn paired_conversation() -> Vec<Message> {
        vec![
            Message::system("you are a coding agent"),
            Message::user("list files").with_importance(10.0),
            Message::assistant_with_calls("", vec![call("c1")]),
            Message::tool_result("c1", "a.txt\nb.txt"),
            Message::assistant("two files"),
        ]
    }

    fn params(max_prompt: usize) -> TruncationParams {
        TruncationParams {
            max_prompt_tokens: max_prompt,
            token_ratio: 2.5,
            response_buffer: 8000,
        }
    }

    // ── preflight ─────────────────────────────────────────────────────────────

    #[test]
    fn preflight_clean_conversation_is_empty() {
        assert!(preflight(&paired_conversation()).is_empty());
    }

    #[test]
    fn preflight_detects_duplicate_ids() {
        let msgs = vec![
            Message::assistant_with_calls("", vec![call("dup")]),
            Message::tool_result("dup", "r"),
            Message::assistant_with_calls("", vec![call("dup")]),
            Message::tool_result("dup", "r"),
        ];
        let diags = preflight(&msgs);
        assert!(diags.iter().any(|d| d.contains("duplicate tool_call id: dup")));
    }

    #[test]
    fn preflight_detects_orphaned_call() {
        let msgs = vec![Message::assistant_with_calls("", vec![call("lost")])];
        let diags = preflight(&msgs);
        assert!(diags.iter().any(|d| d.contains("orphaned tool_call: lost")));
    }

    #[test]
    fn preflight_detects_orphaned_result() {
        let msgs = vec![Message::tool_result("stray", "r")];
        let diags = preflight(&msgs);
        assert!(diags.iter().any(|d| d.contains("orphaned tool result: stray")));
    }

    #[test]
    fn preflight_result_before_call_is_orphaned() {
        let msgs = vec![
            Message::tool_result("x", "too early"),
            Message::assistant_with_calls("", vec![call("x")]),
            Message::tool_result("x", "on time"),
        ];
        let diags = preflight(&msgs);
        assert!(diags.iter().any(|d| d.contains("orphaned tool result: x")));
    }

    // ── pair_fix ──────────────────────────────────────────────────────────────

    #[test]
    fn pair_fix_keeps_well_paired_conversation() {
        let msgs = paired_conversation();
        let fixed = pair_fix(&msgs);
        assert_eq!(fixed.len(), msgs.len());
        assert!(fixed[2].tool_calls.is_some());
    }

    #[test]
    fn pair_fix_drops_orphan_result() {
        let msgs = vec![Message::user("q"), Message::tool_result("ghost", "r")];
        let fixed = pair_fix(&msgs);
        assert_eq!(fixed.len(), 1);
        assert_eq!(fixed[0].role, Role::User);
    }

    #[test]
    fn pair_fix_strips_unanswered_calls_but_keeps_text() {
        let msgs = vec![Message::assistant_with_calls("partial reply", vec![call("unanswered")])];
        let fixed = pair_fix(&msgs);
        assert!(fixed[0].tool_calls.is_none());
        assert_eq!(fixed[0].content, "partial reply");
    }

    #[test]
    fn pair_fix_keeps_answered_and_strips_unanswered_in_same_message() {
        let msgs = vec![
            Message::assistant_with_calls("", vec![call("a"), call("b")]),
            Message::tool_result("a", "done"),
        ];
        let fixed = pair_fix(&msgs);
        let ids = fixed[0].tool_call_ids();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(fixed.len(), 2);
    }

    #[test]
    fn pair_fix_is_idempotent() {
        let msgs = vec![
            Message::user("q"),
            Message::tool_result("ghost", "r"),
            Message::assistant_with_calls("t", vec![call("u")]),
        ];
        let once = pair_fix(&msgs);
        let twice = pair_fix(&once);
        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
    }

    #[test]
    fn pair_fix_output_passes_preflight() {
        let msgs = vec![
            Message::tool_result("early", "r"),
            Message::assistant_with_calls("", vec![call("a"), call("b")]),
            Message::tool_result("a", "done"),
            Message::assistant_with_calls("", vec![call("never")]),
        ];
        let fixed = pair_fix(&msgs);
        assert!(preflight(&fixed).is_empty(), "{:?}", preflight(&fixed));
    }

    // ── Budget arithmetic ─────────────────────────────────────────────────────

    #[test]
    fn effective_limit_subtracts_all_reserves() {
        // 128000 − 1000 − 12800 − 8000 = 106200
        assert_eq!(effective_limit(128_000, 1000, 8000), 106_200);
    }

    #[test]
    fn effective_limit_floors_at_minimum() {
        assert_eq!(effective_limit(10_000, 50_000, 8000), MIN_EFFECTIVE_TOKENS);
    }

    #[test]
    fn tool_schema_cost_scales_with_schema_size() {
        let small = vec![ToolSchema {
            name: "t".into(),
            description: "d".into(),
            parameters: json!({"type": "object"}),
        }];
        let large = vec![ToolSchema {
            name: "t".into(),
            description: "d".repeat(1000),
            parameters: json!({"type": "object"}),
        }];
        assert!(tool_schema_cost(&large, 2.5) > tool_schema_cost(&small, 2.5));
    }

    #[test]
    fn empty_tools_cost_nothing() {
        assert_eq!(tool_schema_cost(&[], 2.5), 0);
    }

    // ── Units ─────────────────────────────────────────────────────────────────

    #[test]
    fn units_group_assistant_with_its_results() {
        let units = group_units(&paired_conversation(), 2.5);
        // system, user, {assistant + result}, assistant
        assert_eq!(units.len(), 4);
        assert_eq!(units[2].messages.len(), 2);
    }

    #[test]
    fn unit_grouping_stops_at_foreign_result() {
        let msgs = vec![
            Message::assistant_with_calls("", vec![call("mine")]),
            Message::tool_result("mine", "r"),
            Message::tool_result("other", "r"),
        ];
        let units = group_units(&msgs, 2.5);
        assert_eq!(units.len(), 2);
        assert!(units[1].orphan_tool_result);
    }

    // ── validate_and_truncate ─────────────────────────────────────────────────

    #[tokio::test]
    async fn under_budget_passes_through_in_order() {
        let msgs = paired_conversation();
        let out =
            validate_and_truncate(msgs.clone(), &[], &params(128_000), &TranscriptCompressor)
                .await;
        assert_eq!(out.len(), msgs.len());
        for (a, b) in out.iter().zip(&msgs) {
            assert_eq!(a.content, b.content);
        }
    }

    /// Build a conversation guaranteed to blow a small budget: 50 dense
    /// user/assistant pairs after the preserved task.
    fn dense_conversation() -> Vec<Message> {
        let mut msgs = vec![
            Message::system("system prompt"),
            Message::user("the original task").with_importance(10.0),
        ];
        for i in 0..50 {
            msgs.push(Message::user(format!("question {i}: {}", "x".repeat(400))));
            msgs.push(Message::assistant(format!("answer {i}: {}", "y".repeat(400))));
        }
        msgs
    }

    #[tokio::test]
    async fn over_budget_output_is_smaller_and_fits() {
        let msgs = dense_conversation();
        let p = params(12_000);
        let out = validate_and_truncate(msgs.clone(), &[], &p, &TranscriptCompressor).await;

        assert!(out.len() <= msgs.len());
        let effective = effective_limit(p.max_prompt_tokens, 0, p.response_buffer);
        // The kept portion (everything but the synthetic summary) fits.
        let kept_tokens: usize = out
            .iter()
            .filter(|m| m.metadata.is_none())
            .map(|m| m.estimated_tokens(p.token_ratio))
            .sum();
        assert!(
            kept_tokens <= effective,
            "kept {kept_tokens} tokens > effective {effective}"
        );
    }

    #[tokio::test]
    async fn truncation_keeps_system_summary_task_then_newest() {
        let msgs = dense_conversation();
        let out = validate_and_truncate(msgs, &[], &params(12_000), &TranscriptCompressor).await;

        assert_eq!(out[0].role, Role::System);
        assert!(out[1].metadata.is_some(), "second message is the summary");
        assert_eq!(out[2].content, "the original task");
        // The newest exchange survives.
        assert!(out.iter().any(|m| m.content.starts_with("answer 49")));
        // The oldest exchange does not survive verbatim.
        assert!(!out.iter().any(|m| m.content.starts_with("question 0:")));
    }

    #[tokio::test]
    async fn truncated_output_passes_preflight() {
        let mut msgs = dense_conversation();
        msgs.push(Message::assistant_with_calls("", vec![call("tc")]));
        msgs.push(Message::tool_result("tc", &"z".repeat(300)));
        let out = validate_and_truncate(msgs, &[], &params(12_000), &TranscriptCompressor).await;
        assert!(preflight(&out).is_empty(), "{:?}", preflight(&out));
    }

    #[tokio::test]
    async fn tiny_budget_keeps_only_skeleton() {
        // A huge tool payload pushes effective to its floor: only system,
        // summary, and the preserved task survive.
        let msgs = dense_conversation();
        let huge_tool = vec![ToolSchema {
            name: "big".into(),
            description: "d".repeat(400_000),
            parameters: json!({"type": "object"}),
        }];
        let out =
            validate_and_truncate(msgs, &huge_tool, &params(100_000), &TranscriptCompressor).await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].role, Role::System);
        assert!(out[1].metadata.is_some());
        assert_eq!(out[2].content, "the original task");
    }

    #[tokio::test]
    async fn orphan_tool_result_unit_is_dropped_not_compressed() {
        let mut msgs = dense_conversation();
        msgs.insert(2, Message::tool_result("stale", "left over from older truncation"));
        let out = validate_and_truncate(msgs, &[], &params(12_000), &TranscriptCompressor).await;
        assert!(!out
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some("stale")));
        assert!(preflight(&out).is_empty());
    }

    #[tokio::test]
    async fn units_never_split_mid_group() {
        let mut msgs = vec![
            Message::system("sys"),
            Message::user("task").with_importance(10.0),
        ];
        for i in 0..30 {
            let id = format!("c{i}");
            msgs.push(Message::assistant_with_calls(
                "",
                vec![ToolCall::new(&id, "execute_command", json!({"command": "x".repeat(200)}))],
            ));
            msgs.push(Message::tool_result(&id, "o".repeat(200)));
        }
        let out = validate_and_truncate(msgs, &[], &params(12_000), &TranscriptCompressor).await;

        // Every surviving call has its result and vice versa.
        assert!(preflight(&out).is_empty());
        for m in &out {
            for id in m.tool_call_ids() {
                assert!(out
                    .iter()
                    .any(|t| t.tool_call_id.as_deref() == Some(id)));
            }
        }
    }

    struct FailingCompressor;

    #[async_trait]
    impl Compressor for FailingCompressor {
        async fn compress(
            &self,
            _dropped: &[Message],
            _task: Option<&str>,
        ) -> anyhow::Result<Message> {
            anyhow::bail!("compression backend unavailable")
        }
    }

    #[tokio::test]
    async fn compression_failure_drops_silently() {
        let msgs = dense_conversation();
        let out = validate_and_truncate(msgs, &[], &params(12_000), &FailingCompressor).await;
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[1].content, "the original task", "no summary inserted");
    }

    // ── uniquify ──────────────────────────────────────────────────────────────

    #[test]
    fn uniquify_first_occurrence_unchanged() {
        let mut seen = HashMap::new();
        assert_eq!(uniquify_call_id("shell".into(), &mut seen), "shell");
    }

    #[test]
    fn uniquify_repeats_get_counters() {
        let mut seen = HashMap::new();
        assert_eq!(uniquify_call_id("shell".into(), &mut seen), "shell");
        assert_eq!(uniquify_call_id("shell".into(), &mut seen), "shell_2");
        assert_eq!(uniquify_call_id("shell".into(), &mut seen), "shell_3");
    }
}
