// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
//! Repair of malformed tool-call arguments.
//!
//! Models occasionally emit argument blobs that are not valid JSON: invalid
//! escape sequences inside strings, a missing comma between pairs, or a
//! truncated object when the stream was cut off.  Rather than failing the
//! tool call outright, the fragments go through a repair pass; only when
//! every strategy fails do the arguments fall back to `{}`.

use serde_json::Value;
use tracing::warn;

/// Parse an accumulated arguments blob, repairing common defects.
///
/// Empty input yields an empty object (providers require the arguments to be
/// an object, never null).
pub fn parse_arguments(raw: &str, tool_name: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(parse_err) => match attempt_repair(raw) {
            Some(v) => {
                warn!(tool_name, "repaired invalid JSON arguments from model");
                v
            }
            None => {
                warn!(
                    tool_name,
                    error = %parse_err,
                    raw,
                    "tool call arguments unparseable; substituting {{}}"
                );
                Value::Object(Default::default())
            }
        },
    }
}

fn attempt_repair(raw: &str) -> Option<Value> {
    // 1. Invalid escape sequences inside string values (`\c`, `\(`, …) —
    //    escape the backslash so serde can parse.
    let fixed = fix_invalid_escapes(raw);
    if let Ok(v) = serde_json::from_str::<Value>(&fixed) {
        return Some(v);
    }

    // 2. Missing comma between pairs, e.g. `"key1"value2": ...`.
    let re = regex::Regex::new(r#""([^"]+)"([a-zA-Z_][a-zA-Z0-9_]*)":\s*"#).ok()?;
    let repaired = re.replace_all(&fixed, r#""$1", "$2": "#);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    // 3. Truncated object: close an open string and the trailing brace.
    if !fixed.trim().ends_with('}') {
        let mut completed = fixed.clone();
        if fixed.chars().filter(|&c| c == '"').count() % 2 == 1 {
            completed.push('"');
        }
        completed.push('}');
        if let Ok(v) = serde_json::from_str::<Value>(&completed) {
            return Some(v);
        }
    }

    None
}

/// Walk a JSON string and turn invalid escape sequences inside string values
/// into escaped backslashes.  Valid escapes (`"`, `\`, `/`, `b`, `f`, `n`,
/// `r`, `t`, `u`) pass through unchanged.
fn fix_invalid_escapes(raw: &str) -> String {
    let mut result = String::with_capacity(raw.len() + 16);
    let mut chars = raw.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}
