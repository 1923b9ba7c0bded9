// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
mod logger;
mod stats;
mod toolops;

pub use logger::{append_jsonl, LogLevel, Logger};
pub use stats::{sample_memory, MemorySample, ProcessStats};
pub use toolops::{ToolOpEntry, ToolOpsLog};
