// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use clio_config::AgentConfig;
use clio_log::ProcessStats;
use clio_model::{
    capabilities, repair, Message, Provider, ProviderError, StopReason, StreamEvent, ToolCall,
    ToolSchema, Usage,
};
use clio_tools::ToolRegistry;

use crate::{
    compress::Compressor,
    events::AgentEvent,
    executor::ToolExecutor,
    session::Session,
    validate::{self, TruncationParams},
};

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a tool-free reply.
    Completed,
    /// The user cancelled; the session is consistent.
    Cancelled,
    /// The iteration budget ran out before a final reply.
    IterationLimitReached,
    /// A non-retryable failure ended the turn.
    Fatal(String),
}

/// The agent core: owns the session and drives the model ↔ tool loop.
///
/// One turn runs serially — the stream is consumed to completion, then each
/// requested tool runs in emission order, then the loop goes around.  The
/// cancellation channel interrupts every suspension point; a dropped sender
/// counts as a cancel, so callers keep it alive for the turn.
pub struct Agent {
    session: Session,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    executor: ToolExecutor,
    compressor: Box<dyn Compressor>,
    config: AgentConfig,
    stats: Option<ProcessStats>,
    /// Every tool-call id ever seen in this session, for re-keying
    /// duplicates from providers that reuse ids across turns.
    seen_call_ids: HashMap<String, u32>,
}

impl Agent {
    pub fn new(
        session: Session,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        executor: ToolExecutor,
        compressor: Box<dyn Compressor>,
        config: AgentConfig,
        stats: Option<ProcessStats>,
    ) -> Self {
        let mut seen_call_ids = HashMap::new();
        for m in session.messages() {
            for id in m.tool_call_ids() {
                seen_call_ids.insert(id.to_string(), 1);
            }
        }
        Self {
            session,
            provider,
            tools,
            executor,
            compressor,
            config,
            stats,
            seen_call_ids,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Release the session (and its lock) back to the caller.
    pub fn into_session(self) -> Session {
        self.session
    }

    fn capture(&mut self, phase: &str) {
        if let Some(stats) = &mut self.stats {
            stats.capture(phase);
        }
    }

    /// Run one turn: append the user message, then iterate model and tool
    /// rounds until a tool-free reply, cancellation, a fatal failure, or the
    /// iteration budget.
    ///
    /// Errors never propagate to the caller as panics or raw failures — the
    /// outcome carries the classification and `tx` gets a readable sentence.
    /// The returned `Err` covers only session persistence failures.
    pub async fn run_turn(
        &mut self,
        user_text: &str,
        tx: mpsc::Sender<AgentEvent>,
        mut cancel: oneshot::Receiver<()>,
    ) -> anyhow::Result<TurnOutcome> {
        if cancel_requested(&mut cancel) {
            let _ = tx.send(AgentEvent::TurnComplete).await;
            return Ok(TurnOutcome::Cancelled);
        }

        self.capture("turn_start");
        self.session
            .append_message(Message::user(user_text).with_importance(10.0));
        self.session.save()?;

        let schemas = self.tool_schemas();

        for iteration in 1..=self.config.max_iterations {
            if cancel_requested(&mut cancel) {
                return self.finish_cancelled(&tx, None).await;
            }
            self.capture("iteration_start");
            debug!(iteration, "starting model iteration");

            let outgoing = self.prepare_outgoing(&schemas, &tx).await;

            // Open the stream, retrying transient failures with backoff.
            let mut stream = match self
                .open_with_retry(&outgoing, &schemas, &mut cancel)
                .await
            {
                Ok(Some(s)) => s,
                Ok(None) => return self.finish_cancelled(&tx, None).await,
                Err(e) => return self.finish_fatal(&tx, e.to_string()).await,
            };

            // Consume events until the stream is exhausted or cancelled.
            let mut acc = TurnAccumulator::default();
            let mut stream_error: Option<ProviderError> = None;
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel => {
                        // Partial tool calls are discarded before append so
                        // the session never holds an unterminated call.
                        let partial = (!acc.text.is_empty()).then(|| acc.text.clone());
                        return self.finish_cancelled(&tx, partial).await;
                    }
                    item = stream.next() => match item {
                        None => break,
                        Some(Ok(event)) => {
                            match &event {
                                StreamEvent::Text(t) => {
                                    let _ = tx.send(AgentEvent::TextDelta(t.clone())).await;
                                }
                                StreamEvent::Thinking(t) => {
                                    let _ = tx.send(AgentEvent::Thinking(t.clone())).await;
                                }
                                StreamEvent::Usage { input_tokens, output_tokens } => {
                                    let _ = tx.send(AgentEvent::TokenUsage {
                                        input: *input_tokens,
                                        output: *output_tokens,
                                    }).await;
                                }
                                _ => {}
                            }
                            if acc.push(event) {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            stream_error = Some(e);
                            break;
                        }
                    }
                }
            }

            if let Some(e) = stream_error {
                // A stream that died mid-response cannot be replayed without
                // duplicating already-streamed content; the turn ends here.
                return self.finish_fatal(&tx, format!("model stream failed: {e}")).await;
            }

            let (text, calls, _usage, stop) = acc.finish(&mut self.seen_call_ids);
            debug!(
                text_len = text.len(),
                call_count = calls.len(),
                stop = ?stop,
                "iteration complete"
            );

            if !text.is_empty() {
                let _ = tx.send(AgentEvent::TextComplete(text.clone())).await;
            }

            if calls.is_empty() {
                if !text.is_empty() {
                    self.session.append_message(Message::assistant(&text));
                }
                self.session.save()?;
                let _ = tx.send(AgentEvent::TurnComplete).await;
                return Ok(TurnOutcome::Completed);
            }

            // Assistant message first, then its results in emission order.
            self.session
                .append_message(Message::assistant_with_calls(&text, calls.clone()));
            self.session.save()?;

            for call in &calls {
                let _ = tx
                    .send(AgentEvent::ToolCallStarted {
                        id: call.id.clone(),
                        name: call.name.clone(),
                    })
                    .await;

                let mut cancelled_during_tool = false;
                let outcome = {
                    let exec_fut = self.executor.execute(call);
                    tokio::pin!(exec_fut);
                    tokio::select! {
                        biased;
                        _ = &mut cancel => {
                            cancelled_during_tool = true;
                            // The in-flight tool gets a bounded grace period
                            // to produce its result before force-termination.
                            let grace = Duration::from_secs(self.config.cancel_grace_secs);
                            tokio::time::timeout(grace, &mut exec_fut).await.ok()
                        }
                        outcome = &mut exec_fut => Some(outcome),
                    }
                };

                match outcome {
                    Some(outcome) => {
                        let _ = tx
                            .send(AgentEvent::ToolCallFinished {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                output: outcome.display.clone(),
                                success: outcome.success,
                            })
                            .await;
                        self.session.append_message(outcome.message);
                    }
                    None => {
                        // Grace elapsed: synthesize a result so the already
                        // appended call stays paired.
                        warn!(tool = %call.name, "tool force-terminated on cancellation");
                        let mut msg = Message::tool_result(&call.id, "[cancelled before completion]");
                        msg.name = Some(call.name.clone());
                        self.session.append_message(msg);
                    }
                }
                // Durable before the next model request: a crash cannot lose
                // an observed tool outcome.
                self.session.save()?;
                self.capture("after_tool");

                if cancelled_during_tool || cancel_requested(&mut cancel) {
                    return self.finish_cancelled(&tx, None).await;
                }
            }
        }

        let note = format!(
            "reached the iteration limit ({}) without a final answer; stopping this turn",
            self.config.max_iterations
        );
        let _ = tx.send(AgentEvent::Error(note)).await;
        let _ = tx.send(AgentEvent::TurnComplete).await;
        Ok(TurnOutcome::IterationLimitReached)
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        if !self.provider.supports_tools() {
            return vec![];
        }
        self.tools
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect()
    }

    /// Validate and budget the conversation for the next request.
    async fn prepare_outgoing(
        &mut self,
        schemas: &[ToolSchema],
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Vec<Message> {
        let max_prompt = capabilities::max_prompt_tokens(
            self.provider.name(),
            self.provider.model_name(),
            self.provider.base_url(),
        ) as usize;
        let params = TruncationParams {
            max_prompt_tokens: max_prompt,
            token_ratio: self.session.token_ratio(),
            response_buffer: self.config.response_buffer,
        };
        let before = self.session.messages().len();
        let outgoing = validate::validate_and_truncate(
            self.session.messages().to_vec(),
            schemas,
            &params,
            self.compressor.as_ref(),
        )
        .await;
        if outgoing.len() != before {
            let _ = tx
                .send(AgentEvent::ContextTruncated {
                    messages_before: before,
                    messages_after: outgoing.len(),
                })
                .await;
        }
        outgoing
    }

    /// Open the provider stream, retrying retryable failures with
    /// exponential backoff and jitter.  `Ok(None)` means cancelled while
    /// waiting.
    async fn open_with_retry(
        &mut self,
        messages: &[Message],
        schemas: &[ToolSchema],
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<Option<clio_model::EventStream>, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            match self.provider.open_stream(messages, schemas).await {
                Ok(stream) => return Ok(Some(stream)),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.retry_attempts => {
                    attempt += 1;
                    let delay = backoff_delay(self.config.retry_base_ms, attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable provider failure; backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = &mut *cancel => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Commit partial text, restore pairing, persist, and report.
    async fn finish_cancelled(
        &mut self,
        tx: &mpsc::Sender<AgentEvent>,
        partial_text: Option<String>,
    ) -> anyhow::Result<TurnOutcome> {
        if let Some(text) = partial_text {
            self.session.append_message(Message::assistant(text));
        }
        let fixed = validate::pair_fix(self.session.messages());
        self.session.replace_messages(fixed);
        self.session.save()?;
        let _ = tx.send(AgentEvent::TurnComplete).await;
        Ok(TurnOutcome::Cancelled)
    }

    async fn finish_fatal(
        &mut self,
        tx: &mpsc::Sender<AgentEvent>,
        message: String,
    ) -> anyhow::Result<TurnOutcome> {
        warn!(error = %message, "turn ended fatally");
        self.session.save()?;
        let _ = tx.send(AgentEvent::Error(message.clone())).await;
        let _ = tx.send(AgentEvent::TurnComplete).await;
        Ok(TurnOutcome::Fatal(message))
    }
}

/// Non-blocking cancellation probe.  A dropped sender counts as a cancel,
/// which a plain `is_ok()` on `try_recv` would miss.
fn cancel_requested(cancel: &mut oneshot::Receiver<()>) -> bool {
    !matches!(
        cancel.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}

/// Exponential backoff with jitter: `base · 2^(attempt−1)` plus up to half
/// the base, derived from the clock so no RNG dependency is needed.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1).min(16)));
    let jitter_span = (base_ms / 2).max(1);
    let jitter = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0)
        % jitter_span;
    Duration::from_millis(exp + jitter)
}

// ─── Stream accumulation ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    args: String,
}

/// Folds stream events into text, tool calls (keyed by provider index), and
/// usage.  `push` returns `true` on the terminal `Done` event.
#[derive(Default)]
struct TurnAccumulator {
    text: String,
    thinking: String,
    pending: BTreeMap<u32, PendingCall>,
    completed: Vec<PendingCall>,
    usage: Usage,
    stop: Option<StopReason>,
}

impl TurnAccumulator {
    fn push(&mut self, event: StreamEvent) -> bool {
        match event {
            StreamEvent::Text(t) => self.text.push_str(&t),
            StreamEvent::Thinking(t) => self.thinking.push_str(&t),
            StreamEvent::ToolStart { index, id, name } => {
                let slot = self.pending.entry(index).or_default();
                if !id.is_empty() {
                    slot.id = id;
                }
                if !name.is_empty() {
                    slot.name = name;
                }
            }
            StreamEvent::ToolArgs { index, fragment } => {
                self.pending.entry(index).or_default().args.push_str(&fragment);
            }
            StreamEvent::ToolEnd { index, id, name, arguments } => {
                let bare = id.is_empty() && name.is_empty() && arguments.is_empty();
                match self.pending.remove(&index) {
                    None if bare => {
                        // A non-tool content block closing; nothing to do.
                    }
                    maybe_slot => {
                        let mut slot = maybe_slot.unwrap_or_default();
                        if !id.is_empty() {
                            slot.id = id;
                        }
                        if !name.is_empty() {
                            slot.name = name;
                        }
                        slot.args.push_str(&arguments);
                        self.completed.push(slot);
                    }
                }
            }
            StreamEvent::Usage { input_tokens, output_tokens } => {
                self.usage.input_tokens += input_tokens;
                self.usage.output_tokens += output_tokens;
            }
            StreamEvent::Stop(reason) => self.stop = Some(reason),
            StreamEvent::Done => return true,
            StreamEvent::Error(e) => {
                // Recoverable: logged and skipped, the stream decides when to
                // actually end.
                warn!(error = %e, "model stream reported an error event");
            }
        }
        false
    }

    /// Materialize the accumulated calls: parse (and repair) arguments, drop
    /// undispatchable empty names, synthesize missing ids, and re-key ids
    /// already used in this session.
    fn finish(
        mut self,
        seen_ids: &mut HashMap<String, u32>,
    ) -> (String, Vec<ToolCall>, Usage, Option<StopReason>) {
        let mut ordered = std::mem::take(&mut self.completed);
        ordered.extend(std::mem::take(&mut self.pending).into_values());

        let mut calls = Vec::with_capacity(ordered.len());
        for (i, slot) in ordered.into_iter().enumerate() {
            if slot.name.is_empty() {
                warn!(
                    tool_call_id = %slot.id,
                    "dropping tool call with empty name; cannot dispatch"
                );
                continue;
            }
            let arguments = repair::parse_arguments(&slot.args, &slot.name);
            let mut id = slot.id;
            if id.is_empty() {
                id = format!("tc_synthetic_{i}");
                warn!(tool_name = %slot.name, %id, "tool call had empty id; generated one");
            }
            let id = validate::uniquify_call_id(id, seen_ids);
            calls.push(ToolCall::new(id, slot.name, arguments));
        }

        (self.text, calls, self.usage, self.stop)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod agent_unit_tests {
    use super::*;

    // ── Accumulator ───────────────────────────────────────────────────────────

    #[test]
    fn text_deltas_concatenate() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::Text("hel".into()));
        acc.push(StreamEvent::Text("lo".into()));
        let (text, calls, ..) = acc.finish(&mut HashMap::new());
        assert_eq!(text, "hello");
        assert!(calls.is_empty());
    }

    #[test]
    fn fragmented_call_reassembles() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::ToolStart { index: 0, id: "c1".into(), name: "shell".into() });
        acc.push(StreamEvent::ToolArgs { index: 0, fragment: r#"{"comma"#.into() });
        acc.push(StreamEvent::ToolArgs { index: 0, fragment: r#"nd":"ls"}"#.into() });
        assert!(acc.push(StreamEvent::Done));

        let (_, calls, ..) = acc.finish(&mut HashMap::new());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].arguments["command"], "ls");
    }

    #[test]
    fn parallel_calls_ordered_by_index() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::ToolStart { index: 1, id: "b".into(), name: "t2".into() });
        acc.push(StreamEvent::ToolStart { index: 0, id: "a".into(), name: "t1".into() });
        acc.push(StreamEvent::ToolArgs { index: 0, fragment: "{}".into() });
        acc.push(StreamEvent::ToolArgs { index: 1, fragment: "{}".into() });

        let (_, calls, ..) = acc.finish(&mut HashMap::new());
        assert_eq!(calls[0].id, "a");
        assert_eq!(calls[1].id, "b");
    }

    #[test]
    fn whole_call_tool_end_completes_immediately() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::ToolEnd {
            index: 0,
            id: "shell".into(),
            name: "shell".into(),
            arguments: r#"{"command":"ls"}"#.into(),
        });
        // A second call at the same index must not merge into the first.
        acc.push(StreamEvent::ToolEnd {
            index: 0,
            id: "shell".into(),
            name: "shell".into(),
            arguments: r#"{"command":"pwd"}"#.into(),
        });

        let (_, calls, ..) = acc.finish(&mut HashMap::new());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments["command"], "ls");
        assert_eq!(calls[1].arguments["command"], "pwd");
        assert_eq!(calls[1].id, "shell_2", "duplicate id re-keyed");
    }

    #[test]
    fn bare_tool_end_for_text_block_is_ignored() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::Text("hi".into()));
        acc.push(StreamEvent::ToolEnd {
            index: 0,
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
        let (_, calls, ..) = acc.finish(&mut HashMap::new());
        assert!(calls.is_empty());
    }

    #[test]
    fn anthropic_style_start_args_end_sequence() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::ToolStart { index: 1, id: "toolu_1".into(), name: "grep".into() });
        acc.push(StreamEvent::ToolArgs { index: 1, fragment: r#"{"pattern":"x"}"#.into() });
        acc.push(StreamEvent::ToolEnd {
            index: 1,
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
        let (_, calls, ..) = acc.finish(&mut HashMap::new());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].arguments["pattern"], "x");
    }

    #[test]
    fn empty_name_call_is_dropped() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::ToolStart { index: 0, id: "c1".into(), name: String::new() });
        acc.push(StreamEvent::ToolArgs { index: 0, fragment: "{}".into() });
        let (_, calls, ..) = acc.finish(&mut HashMap::new());
        assert!(calls.is_empty());
    }

    #[test]
    fn empty_id_gets_synthetic_fallback() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::ToolStart { index: 0, id: String::new(), name: "shell".into() });
        acc.push(StreamEvent::ToolArgs { index: 0, fragment: "{}".into() });
        let (_, calls, ..) = acc.finish(&mut HashMap::new());
        assert_eq!(calls[0].id, "tc_synthetic_0");
    }

    #[test]
    fn unparseable_args_fall_back_to_empty_object() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::ToolStart { index: 0, id: "c".into(), name: "t".into() });
        acc.push(StreamEvent::ToolArgs { index: 0, fragment: "garbage ]][[".into() });
        let (_, calls, ..) = acc.finish(&mut HashMap::new());
        assert_eq!(calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn usage_events_accumulate_across_the_stream() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::Usage { input_tokens: 100, output_tokens: 0 });
        acc.push(StreamEvent::Usage { input_tokens: 0, output_tokens: 40 });
        let (.., usage, _) = acc.finish(&mut HashMap::new());
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 40);
    }

    #[test]
    fn stop_reason_is_recorded() {
        let mut acc = TurnAccumulator::default();
        acc.push(StreamEvent::Stop(StopReason::ToolCalls));
        let (.., stop) = acc.finish(&mut HashMap::new());
        assert_eq!(stop, Some(StopReason::ToolCalls));
    }

    // ── Backoff ───────────────────────────────────────────────────────────────

    #[test]
    fn backoff_grows_exponentially() {
        let d1 = backoff_delay(1000, 1).as_millis() as u64;
        let d2 = backoff_delay(1000, 2).as_millis() as u64;
        let d3 = backoff_delay(1000, 3).as_millis() as u64;
        assert!((1000..1500).contains(&d1), "{d1}");
        assert!((2000..2500).contains(&d2), "{d2}");
        assert!((4000..4500).contains(&d3), "{d3}");
    }

    #[test]
    fn cancel_probe_sees_send_and_drop() {
        let (tx, mut rx) = oneshot::channel::<()>();
        assert!(!cancel_requested(&mut rx));
        tx.send(()).unwrap();
        assert!(cancel_requested(&mut rx));

        let (tx2, mut rx2) = oneshot::channel::<()>();
        drop(tx2);
        assert!(cancel_requested(&mut rx2), "dropped sender counts as cancel");
    }
}
