// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
//! Symbol extraction via an external parser.
//!
//! Parsing source code properly is someone else's job: this tool shells out
//! to a ctags-compatible binary (`ctags -x`, configurable) and reformats its
//! cross-reference output.  When the binary is absent the tool reports a
//! usable error instead of failing the turn.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::tool::{Tool, ToolInvocation, ToolOutput};

const PARSER_TIMEOUT_SECS: u64 = 30;

pub struct CodeIntelTool {
    parser_cmd: String,
}

impl Default for CodeIntelTool {
    fn default() -> Self {
        Self { parser_cmd: "ctags".into() }
    }
}

impl CodeIntelTool {
    pub fn with_parser(parser_cmd: impl Into<String>) -> Self {
        Self { parser_cmd: parser_cmd.into() }
    }
}

#[async_trait]
impl Tool for CodeIntelTool {
    fn name(&self) -> &str {
        "code_intel"
    }

    fn description(&self) -> &str {
        "Extract symbols (functions, types, constants) from a source file.\n\
         Returns one symbol per line: name, kind, and line number.\n\
         Optionally filter with 'kind' (e.g. \"function\", \"struct\")."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Source file to extract symbols from"
                },
                "kind": {
                    "type": "string",
                    "description": "Only return symbols of this kind (optional)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn path_params(&self) -> &[&str] {
        &["path"]
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(PARSER_TIMEOUT_SECS)
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };
        let kind_filter = call
            .args
            .get("kind")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        debug!(path = %path, parser = %self.parser_cmd, "code_intel tool");

        let mut cmd = Command::new(&self.parser_cmd);
        cmd.args(["-x", "--sort=no"]).arg(&path);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(PARSER_TIMEOUT_SECS),
            cmd.output(),
        )
        .await;

        let output = match result {
            Ok(Ok(o)) => o,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolOutput::err(
                    &call.id,
                    format!(
                        "symbol parser '{}' not found; install universal-ctags or configure another parser",
                        self.parser_cmd
                    ),
                );
            }
            Ok(Err(e)) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => {
                return ToolOutput::err(
                    &call.id,
                    format!("parser timed out after {PARSER_TIMEOUT_SECS}s"),
                )
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ToolOutput::err(
                &call.id,
                format!("parser failed [exit {}]: {stderr}", output.status.code().unwrap_or(-1)),
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let symbols = parse_xref(&stdout, kind_filter.as_deref());
        if symbols.is_empty() {
            ToolOutput::ok(&call.id, format!("[no symbols found in {path}]"))
        } else {
            ToolOutput::ok(&call.id, symbols.join("\n"))
        }
    }
}

/// Reformat `ctags -x` cross-reference lines (`name kind line file text…`)
/// into `name  kind  L<line>` rows, optionally filtered by kind.
fn parse_xref(output: &str, kind_filter: Option<&str>) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let kind = parts.next()?;
            let lineno = parts.next()?;
            if let Some(want) = kind_filter {
                if kind != want {
                    return None;
                }
            }
            Some(format!("{name}  {kind}  L{lineno}"))
        })
        .collect()
}
