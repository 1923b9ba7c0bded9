// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod agent;
mod compress;
mod events;
mod executor;
mod jsonutil;
mod read_result;
mod result_store;
mod session;
pub mod validate;

pub use agent::{Agent, TurnOutcome};
pub use compress::{Compressor, TranscriptCompressor};
pub use events::AgentEvent;
pub use executor::{ExecutorConfig, ToolExecutor, ToolOutcome};
pub use jsonutil::{canonical_json, utf8_preview};
pub use read_result::ReadToolResultTool;
pub use result_store::ResultStore;
pub use session::{Session, SessionError, SessionState, SessionStore};
