// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
//! Small JSON/UTF-8 helpers shared by the validator, executor, and logs.

use serde_json::Value;

/// Canonical compact encoding used for token accounting and log fields.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Truncate `s` to at most `max_bytes`, never slicing inside a UTF-8
/// sequence.  Appends an ellipsis when anything was cut.
pub fn utf8_preview(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
