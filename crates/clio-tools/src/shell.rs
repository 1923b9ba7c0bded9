// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::tool::{Tool, ToolInvocation, ToolOutput};

/// Byte ceiling on captured output.  This is a memory guard, not a context
/// budget: anything over the executor's spill threshold is offloaded to the
/// result store anyway, so the cap only has to keep a runaway subprocess
/// from ballooning the process heap.
const DEFAULT_OUTPUT_CAP_BYTES: usize = 32 * 1024;

/// Built-in tool that runs a shell one-liner.
pub struct ExecuteCommandTool {
    pub timeout_secs: u64,
    pub output_cap_bytes: usize,
    /// Exit codes that do not mark the result as an error.  Code 1 is
    /// included by default: grep/rg report "no matches" and `test` reports
    /// "condition false" with it, and neither means the command broke.
    pub ok_exit_codes: Vec<i32>,
}

impl Default for ExecuteCommandTool {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            ok_exit_codes: vec![0, 1],
        }
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell one-liner and return its output.\n\
         'command' is required; 'workdir' and 'timeout_secs' are optional.\n\
         stdout and stderr come back as labelled sections, followed by the\n\
         exit status when it is non-zero.  Exit code 1 is reported but not\n\
         treated as a failure (grep with no matches, `test` returning false).\n\
         Very long output keeps only its ending, where build and test\n\
         verdicts live; ask again with a pipe (head, grep) for earlier parts.\n\
         Commands run without a terminal: nothing interactive will work.\n\
         For file reads, listings, and text search prefer file_operations."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete bash one-liner to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'command'"),
        };
        let workdir = call
            .args
            .get("workdir")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "execute_command tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&command);
        // stdin is closed so isatty(0) fails and interactive prompts end
        // immediately instead of hanging until the timeout.  The child gets
        // its own process group: a ctrl-c aimed at our foreground group no
        // longer reaches it, cancellation stays the agent's decision.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(wd) = &workdir {
            cmd.current_dir(wd);
        }

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                let code = output.status.code().unwrap_or(-1);
                let text = self.render_output(&output, code);
                if self.ok_exit_codes.contains(&code) {
                    ToolOutput::ok(&call.id, text)
                } else {
                    ToolOutput::err(&call.id, text)
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout}s")),
        }
    }
}

impl ExecuteCommandTool {
    /// Assemble the labelled sections the model sees: stdout, stderr, and a
    /// trailing status line for non-zero exits.
    fn render_output(&self, output: &std::process::Output, code: i32) -> String {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut sections: Vec<String> = Vec::new();
        match (stdout.is_empty(), stderr.is_empty()) {
            (false, false) => {
                sections.push(format!("--- stdout ---\n{}", stdout.trim_end_matches('\n')));
                sections.push(format!("--- stderr ---\n{}", stderr.trim_end_matches('\n')));
            }
            (false, true) => sections.push(stdout.trim_end_matches('\n').to_string()),
            (true, false) => {
                sections.push(format!("--- stderr ---\n{}", stderr.trim_end_matches('\n')))
            }
            (true, true) => {}
        }
        if code != 0 {
            sections.push(format!("command exited with status {code}"));
        }
        if sections.is_empty() {
            sections.push("(no output)".to_string());
        }
        clip_to_tail(&sections.join("\n"), self.output_cap_bytes)
    }
}

/// Keep the final `cap` bytes of `s`, advanced to the next line start, with
/// a marker stating how much was dropped.
///
/// Tail-biased on purpose: compilers, test runners, and most CLIs put their
/// verdict at the end, and the dropped beginning is recoverable by re-running
/// the command through a pipe.  Splitting the budget between head and tail
/// would halve the useful window for no recoverable information.
pub(crate) fn clip_to_tail(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }
    let mut start = s.len() - cap;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    let tail = &s[start..];
    // Advance past the partial first line unless that would eat everything.
    let tail = match tail.find('\n') {
        Some(p) if p + 1 < tail.len() => &tail[p + 1..],
        _ => tail,
    };
    format!(
        "[output clipped: first {} bytes dropped; pipe through head/grep to see them]\n{tail}",
        s.len() - tail.len()
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: Value) -> ToolInvocation {
        ToolInvocation { id: "x1".into(), name: "execute_command".into(), args }
    }

    // ── Output rendering ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let out = ExecuteCommandTool::default()
            .execute(&call(json!({"command": "echo session ready"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(out.content, "session ready");
    }

    #[tokio::test]
    async fn both_streams_come_back_as_labelled_sections() {
        let out = ExecuteCommandTool::default()
            .execute(&call(json!({"command": "echo progress && echo warning >&2"})))
            .await;
        assert!(out.content.contains("--- stdout ---\nprogress"));
        assert!(out.content.contains("--- stderr ---\nwarning"));
    }

    #[tokio::test]
    async fn stderr_only_output_is_still_labelled() {
        let out = ExecuteCommandTool::default()
            .execute(&call(json!({"command": "echo oops >&2"})))
            .await;
        assert!(out.content.starts_with("--- stderr ---"));
        assert!(!out.content.contains("--- stdout ---"));
    }

    #[tokio::test]
    async fn silent_success_reports_no_output() {
        let out = ExecuteCommandTool::default()
            .execute(&call(json!({"command": "true"})))
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "(no output)");
    }

    // ── Exit-code policy ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn grep_style_no_match_is_reported_but_not_a_failure() {
        let out = ExecuteCommandTool::default()
            .execute(&call(json!({"command": "printf abc | grep zzz"})))
            .await;
        assert!(!out.is_error, "exit 1 is 'no matches', not breakage");
        assert!(out.content.contains("command exited with status 1"));
    }

    #[tokio::test]
    async fn build_failure_exit_code_sets_error() {
        let out = ExecuteCommandTool::default()
            .execute(&call(json!({"command": "echo compiling && exit 42"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("compiling"));
        assert!(out.content.contains("command exited with status 42"));
    }

    #[tokio::test]
    async fn ok_exit_codes_are_configurable() {
        let tool = ExecuteCommandTool {
            ok_exit_codes: vec![0, 2],
            ..ExecuteCommandTool::default()
        };
        let out = tool.execute(&call(json!({"command": "exit 2"}))).await;
        assert!(!out.is_error, "code 2 was declared benign for this tool");

        let out = tool.execute(&call(json!({"command": "exit 1"}))).await;
        assert!(out.is_error, "code 1 is no longer on the benign list");
    }

    // ── Arguments and limits ──────────────────────────────────────────────────

    #[tokio::test]
    async fn command_runs_in_requested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = ExecuteCommandTool::default()
            .execute(&call(json!({
                "command": "pwd",
                "workdir": dir.path().to_str().unwrap(),
            })))
            .await;
        // Canonicalised on macOS, verbatim elsewhere; the leaf dir name holds.
        let leaf = dir.path().file_name().unwrap().to_str().unwrap();
        assert!(out.content.contains(leaf), "{}", out.content);
    }

    #[tokio::test]
    async fn missing_command_parameter_is_error_output() {
        let out = ExecuteCommandTool::default().execute(&call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("'command'"));
    }

    #[tokio::test]
    async fn timeout_surfaces_as_error_result() {
        let tool = ExecuteCommandTool { timeout_secs: 1, ..ExecuteCommandTool::default() };
        let out = tool
            .execute(&call(json!({"command": "sleep 30", "timeout_secs": 1})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("timeout after 1s"));
    }

    #[tokio::test]
    async fn subprocesses_see_no_terminal() {
        let out = ExecuteCommandTool::default()
            .execute(&call(json!({
                "command": "if [ -t 0 ]; then echo tty; else echo detached; fi",
            })))
            .await;
        assert_eq!(out.content, "detached");
    }

    #[tokio::test]
    async fn runaway_output_keeps_the_ending() {
        let out = ExecuteCommandTool::default()
            .execute(&call(json!({
                "command": "for i in $(seq 1 5000); do echo \"progress line $i\"; done; echo VERDICT",
            })))
            .await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("[output clipped:"), "{}", &out.content[..80]);
        assert!(out.content.ends_with("VERDICT"), "the verdict at the end survives");
        assert!(!out.content.contains("progress line 1\n"));
        assert!(out.content.len() <= DEFAULT_OUTPUT_CAP_BYTES + 200);
    }

    // ── clip_to_tail ──────────────────────────────────────────────────────────

    #[test]
    fn clip_under_cap_is_identity() {
        assert_eq!(clip_to_tail("short output", 1024), "short output");
        let exact = "x".repeat(64);
        assert_eq!(clip_to_tail(&exact, 64), exact);
    }

    #[test]
    fn clip_starts_at_a_line_boundary() {
        let text = "first line\nsecond line\nthird line";
        let clipped = clip_to_tail(text, 18); // window lands inside "second line"
        let body = clipped.split_once('\n').unwrap().1;
        assert_eq!(body, "third line", "the partial line at the window edge is dropped");
    }

    #[test]
    fn clip_marker_accounts_for_dropped_bytes() {
        let text = format!("{}\nkeep me", "d".repeat(100));
        let clipped = clip_to_tail(&text, 10);
        assert!(clipped.contains("101 bytes dropped"), "{clipped}");
        assert!(clipped.ends_with("keep me"));
    }

    #[test]
    fn clip_of_single_huge_line_still_bounded() {
        let text = "y".repeat(10_000);
        let clipped = clip_to_tail(&text, 100);
        assert!(clipped.len() < 220);
        assert!(clipped.ends_with(&"y".repeat(50)));
    }

    #[test]
    fn clip_never_splits_multibyte_chars() {
        let text = "é".repeat(200); // 2 bytes each
        let clipped = clip_to_tail(&text, 33); // odd cap lands mid-char
        assert!(!clipped.contains('\u{FFFD}'));
        assert!(clipped.ends_with('é'));
    }
}
