// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
/// Events emitted by the agent during a turn.
///
/// The hosting front-end (terminal renderer, JSON-RPC wrapper) subscribes to
/// these to drive its output; the agent itself never prints.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// The complete text response for one iteration
    TextComplete(String),
    /// A reasoning chunk from models that expose their chain of thought
    Thinking(String),
    /// The model has requested a tool call
    ToolCallStarted { id: String, name: String },
    /// A tool call finished; `output` is what the user should see
    ToolCallFinished {
        id: String,
        name: String,
        output: String,
        success: bool,
    },
    /// Token usage reported by the provider for one iteration
    TokenUsage { input: u32, output: u32 },
    /// Context was truncated before a request; counts for the UI
    ContextTruncated {
        messages_before: usize,
        messages_after: usize,
    },
    /// A user-visible error sentence (the turn outcome carries the type)
    Error(String),
    /// The agent has finished processing the current user turn
    TurnComplete,
}
