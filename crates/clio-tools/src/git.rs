// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::tool::{Tool, ToolInvocation, ToolOutput};

const GIT_TIMEOUT_SECS: u64 = 30;

/// Version-control tool driving the `git` binary.
pub struct GitOperationsTool;

#[async_trait]
impl Tool for GitOperationsTool {
    fn name(&self) -> &str {
        "git_operations"
    }

    fn description(&self) -> &str {
        "Run version-control operations against a repository.\n\
         status: short status with branch info.\n\
         log: last 20 commits, one line each.\n\
         diff: working-tree diff, optionally limited to 'path'.\n\
         commit: stage all changes and commit with 'message' (required).\n\
         branch: list branches, or create and switch to 'branch_name' when given."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["status", "log", "diff", "commit", "branch"],
                    "description": "Which git operation to perform"
                },
                "repository": {
                    "type": "string",
                    "description": "Path to the repository working tree"
                },
                "message": {
                    "type": "string",
                    "description": "Commit message (required for commit)"
                },
                "path": {
                    "type": "string",
                    "description": "Restrict diff to this path (optional)"
                },
                "branch_name": {
                    "type": "string",
                    "description": "Branch to create and switch to (optional)"
                }
            },
            "required": ["operation", "repository"],
            "additionalProperties": false
        })
    }

    fn path_params(&self) -> &[&str] {
        &["repository"]
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(GIT_TIMEOUT_SECS)
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutput {
        let operation = match call.args.get("operation").and_then(|v| v.as_str()) {
            Some(op) => op,
            None => return ToolOutput::err(&call.id, "missing required parameter 'operation'"),
        };
        let repo = match call.args.get("repository").and_then(|v| v.as_str()) {
            Some(r) => r.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'repository'"),
        };

        debug!(operation, repo = %repo, "git_operations tool");

        let args: Vec<String> = match operation {
            "status" => vec!["status".into(), "--short".into(), "--branch".into()],
            "log" => vec!["log".into(), "--oneline".into(), "-20".into()],
            "diff" => {
                let mut a = vec!["diff".into()];
                if let Some(p) = call.args.get("path").and_then(|v| v.as_str()) {
                    a.push("--".into());
                    a.push(p.to_string());
                }
                a
            }
            "commit" => {
                let Some(message) = call.args.get("message").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "commit requires 'message'");
                };
                // Stage everything first so the commit sees new files too.
                if let Err(e) = run_git(&repo, &["add".into(), "-A".into()]).await {
                    return ToolOutput::err(&call.id, e);
                }
                vec!["commit".into(), "-m".into(), message.to_string()]
            }
            "branch" => match call.args.get("branch_name").and_then(|v| v.as_str()) {
                Some(name) => vec!["checkout".into(), "-b".into(), name.to_string()],
                None => vec!["branch".into(), "--list".into()],
            },
            other => return ToolOutput::err(&call.id, format!("unknown operation: {other}")),
        };

        match run_git(&repo, &args).await {
            Ok(output) => {
                let text = if output.trim().is_empty() {
                    format!("[{operation}: no output]")
                } else {
                    output
                };
                ToolOutput::ok(&call.id, text)
            }
            Err(e) => ToolOutput::err(&call.id, e),
        }
    }
}

/// Run `git -C <repo> <args>`; returns combined stdout+stderr on success and
/// an error string on non-zero exit, spawn failure, or timeout.
async fn run_git(repo: &str, args: &[String]) -> Result<String, String> {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(repo);
    for a in args {
        cmd.arg(a);
    }
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);

    let result = tokio::time::timeout(
        std::time::Duration::from_secs(GIT_TIMEOUT_SECS),
        cmd.output(),
    )
    .await;

    match result {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if output.status.success() {
                Ok(format!("{stdout}{stderr}"))
            } else {
                Err(format!(
                    "git {} failed [exit {}]: {}{}",
                    args.first().map(String::as_str).unwrap_or(""),
                    output.status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                ))
            }
        }
        Ok(Err(e)) => Err(format!("spawn error: {e}")),
        Err(_) => Err(format!("git timed out after {GIT_TIMEOUT_SECS}s")),
    }
}
