// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolInvocation, ToolOutput};

/// Default number of lines returned by read_file when no limit is given.
/// Kept small to avoid flooding the model context on the first read; the
/// model can paginate with offset + limit to get more.
const DEFAULT_LINE_LIMIT: usize = 200;

/// Hard byte ceiling applied in addition to the line limit.
/// Whichever constraint is hit first determines where the output is cut.
const MAX_READ_BYTES: usize = 20_000;

/// Upper bound on search hits returned in one call.
const DEFAULT_MAX_MATCHES: usize = 100;

/// Filesystem tool: one entry point with an `operation` discriminator.
pub struct FileOperationsTool;

#[async_trait]
impl Tool for FileOperationsTool {
    fn name(&self) -> &str {
        "file_operations"
    }

    fn description(&self) -> &str {
        "Read, write, create, and delete files; list directories; search file contents.\n\
         read_file: default 200 lines / 20 KB, whichever comes first; lines are\n\
         formatted as L{n}:content (1-indexed) and a pagination notice shows the\n\
         next offset when more lines exist. Use offset+limit to page through\n\
         large files instead of re-reading them whole.\n\
         write_file overwrites; create_file fails if the path already exists.\n\
         search_files takes a regex and returns path:line:text matches."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["read_file", "write_file", "create_file",
                             "delete_file", "list_dir", "search_files"],
                    "description": "Which filesystem operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory path (absolute or relative)"
                },
                "content": {
                    "type": "string",
                    "description": "File content for write_file / create_file"
                },
                "pattern": {
                    "type": "string",
                    "description": "Regex for search_files"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum lines to return (default 200)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum search matches (default 100)"
                }
            },
            "required": ["operation", "path"],
            "additionalProperties": false
        })
    }

    fn path_params(&self) -> &[&str] {
        &["path"]
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutput {
        let operation = match call.args.get("operation").and_then(|v| v.as_str()) {
            Some(op) => op.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'operation'"),
        };
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };

        debug!(operation = %operation, path = %path, "file_operations tool");

        match operation.as_str() {
            "read_file" => read_file(call, &path).await,
            "write_file" => write_file(call, &path, false).await,
            "create_file" => write_file(call, &path, true).await,
            "delete_file" => delete_file(call, &path).await,
            "list_dir" => list_dir(call, &path).await,
            "search_files" => search_files(call, &path),
            other => ToolOutput::err(&call.id, format!("unknown operation: {other}")),
        }
    }
}

async fn read_file(call: &ToolInvocation, path: &str) -> ToolOutput {
    let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
    let limit = call
        .args
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
    };
    let text = String::from_utf8_lossy(&bytes);
    let all_lines: Vec<&str> = text.lines().collect();
    let total = all_lines.len();
    let start = offset.saturating_sub(1);

    // Collect lines up to both the line limit and the byte cap.
    let mut selected: Vec<String> = Vec::new();
    let mut byte_count = 0usize;
    let mut truncated_by_bytes = false;
    for (i, line) in all_lines.iter().enumerate().skip(start).take(limit) {
        let line_bytes = line.len() + 1;
        if byte_count + line_bytes > MAX_READ_BYTES {
            truncated_by_bytes = true;
            break;
        }
        selected.push(format!("L{}:{}", i + 1, line));
        byte_count += line_bytes;
    }

    let last_shown = start + selected.len();
    let mut content = selected.join("\n");
    if last_shown < total {
        let reason = if truncated_by_bytes {
            format!("byte limit ({MAX_READ_BYTES} B) reached")
        } else {
            format!("{} more lines", total - last_shown)
        };
        content.push_str(&format!(
            "\n...[{reason} — showing L{}-L{} of {total}; use offset={} to continue]",
            offset,
            offset + selected.len().saturating_sub(1),
            last_shown + 1
        ));
    }
    ToolOutput::ok(&call.id, content)
}

async fn write_file(call: &ToolInvocation, path: &str, must_create: bool) -> ToolOutput {
    let content = call
        .args
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if must_create && tokio::fs::try_exists(path).await.unwrap_or(false) {
        return ToolOutput::err(&call.id, format!("file already exists: {path}"));
    }
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("create dir error: {e}"));
            }
        }
    }
    match tokio::fs::write(path, content).await {
        Ok(()) => ToolOutput::ok(&call.id, format!("wrote {} bytes to {path}", content.len())),
        Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
    }
}

async fn delete_file(call: &ToolInvocation, path: &str) -> ToolOutput {
    match tokio::fs::remove_file(path).await {
        Ok(()) => ToolOutput::ok(&call.id, format!("deleted {path}")),
        Err(e) => ToolOutput::err(&call.id, format!("delete error: {e}")),
    }
}

async fn list_dir(call: &ToolInvocation, path: &str) -> ToolOutput {
    let mut rd = match tokio::fs::read_dir(path).await {
        Ok(rd) => rd,
        Err(e) => return ToolOutput::err(&call.id, format!("list error: {e}")),
    };
    let mut entries: Vec<String> = Vec::new();
    while let Ok(Some(entry)) = rd.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push(if is_dir { format!("{name}/") } else { name });
    }
    entries.sort();
    if entries.is_empty() {
        ToolOutput::ok(&call.id, "[empty directory]")
    } else {
        ToolOutput::ok(&call.id, entries.join("\n"))
    }
}

fn search_files(call: &ToolInvocation, path: &str) -> ToolOutput {
    let pattern = match call.args.get("pattern").and_then(|v| v.as_str()) {
        Some(p) => p,
        None => return ToolOutput::err(&call.id, "search_files requires 'pattern'"),
    };
    let max_results = call
        .args
        .get("max_results")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_MAX_MATCHES as u64) as usize;
    let re = match regex::Regex::new(pattern) {
        Ok(r) => r,
        Err(e) => return ToolOutput::err(&call.id, format!("invalid pattern: {e}")),
    };

    let mut matches: Vec<String> = Vec::new();
    let mut scanned = 0usize;
    for entry in WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if matches.len() >= max_results {
            break;
        }
        scanned += 1;
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue; // binary or unreadable
        };
        for (lineno, line) in content.lines().enumerate() {
            if re.is_match(line) {
                matches.push(format!("{}:{}:{}", entry.path().display(), lineno + 1, line));
                if matches.len() >= max_results {
                    break;
                }
            }
        }
    }

    if matches.is_empty() {
        ToolOutput::ok(
            &call.id,
            format!("no matches for /{pattern}/ in {scanned} files"),
        )
    } else {
        let mut out = matches.join("\n");
        if matches.len() >= max_results {
            out.push_str(&format!(
                "\n...[match cap ({max_results}) reached; use a more specific pattern]"
            ));
        }
        ToolOutput::ok(&call.id, out)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: Value) -> ToolInvocation {
        ToolInvocation { id: "f1".into(), name: "file_operations".into(), args }
    }

    fn op(operation: &str, path: &str, extra: Value) -> ToolInvocation {
        let mut args = json!({ "operation": operation, "path": path });
        if let (Some(obj), Some(extra_obj)) = (args.as_object_mut(), extra.as_object()) {
            for (k, v) in extra_obj {
                obj.insert(k.clone(), v.clone());
            }
        }
        call(args)
    }

    // ── read_file ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn read_returns_numbered_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "alpha\nbeta\ngamma\n").unwrap();

        let out = FileOperationsTool
            .execute(&op("read_file", path.to_str().unwrap(), json!({})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("L1:alpha"));
        assert!(out.content.contains("L3:gamma"));
    }

    #[tokio::test]
    async fn read_offset_and_limit_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "l1\nl2\nl3\nl4\nl5\n").unwrap();

        let out = FileOperationsTool
            .execute(&op("read_file", path.to_str().unwrap(), json!({"offset": 2, "limit": 2})))
            .await;
        assert!(out.content.contains("L2:l2"));
        assert!(out.content.contains("L3:l3"));
        assert!(!out.content.contains("L1:"));
        assert!(!out.content.contains("L4:l4"));
    }

    #[tokio::test]
    async fn read_pagination_notice_suggests_next_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "a\nb\nc\nd\ne\n").unwrap();

        let out = FileOperationsTool
            .execute(&op("read_file", path.to_str().unwrap(), json!({"limit": 2})))
            .await;
        assert!(out.content.contains("offset=3"), "{}", out.content);
    }

    #[tokio::test]
    async fn read_missing_file_is_error_output() {
        let out = FileOperationsTool
            .execute(&op("read_file", "/tmp/clio_no_such_file_xyz.txt", json!({})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("read error"));
    }

    // ── write / create / delete ───────────────────────────────────────────────

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.txt");
        let p = path.to_str().unwrap();

        let out = FileOperationsTool
            .execute(&op("write_file", p, json!({"content": "hello"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[tokio::test]
    async fn create_fails_when_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "old").unwrap();

        let out = FileOperationsTool
            .execute(&op("create_file", path.to_str().unwrap(), json!({"content": "new"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("already exists"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old");
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        std::fs::write(&path, "x").unwrap();

        let out = FileOperationsTool
            .execute(&op("delete_file", path.to_str().unwrap(), json!({})))
            .await;
        assert!(!out.is_error);
        assert!(!path.exists());
    }

    // ── list_dir ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn list_dir_marks_directories_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();

        let out = FileOperationsTool
            .execute(&op("list_dir", dir.path().to_str().unwrap(), json!({})))
            .await;
        assert_eq!(out.content, "a.txt\nb.txt\nsub/");
    }

    #[tokio::test]
    async fn list_empty_dir_says_so() {
        let dir = tempfile::tempdir().unwrap();
        let out = FileOperationsTool
            .execute(&op("list_dir", dir.path().to_str().unwrap(), json!({})))
            .await;
        assert_eq!(out.content, "[empty directory]");
    }

    // ── search_files ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn search_reports_path_line_and_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("code.rs"), "fn main() {}\nlet x = 1;\n").unwrap();

        let out = FileOperationsTool
            .execute(&op(
                "search_files",
                dir.path().to_str().unwrap(),
                json!({"pattern": "fn main"}),
            ))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("code.rs:1:fn main() {}"), "{}", out.content);
    }

    #[tokio::test]
    async fn search_no_matches_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "nothing here\n").unwrap();

        let out = FileOperationsTool
            .execute(&op(
                "search_files",
                dir.path().to_str().unwrap(),
                json!({"pattern": "zzz_absent"}),
            ))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("no matches"));
    }

    #[tokio::test]
    async fn search_invalid_regex_is_error_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = FileOperationsTool
            .execute(&op(
                "search_files",
                dir.path().to_str().unwrap(),
                json!({"pattern": "("}),
            ))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid pattern"));
    }

    #[tokio::test]
    async fn search_honours_match_cap() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (0..50).map(|i| format!("hit {i}\n")).collect();
        std::fs::write(dir.path().join("many.txt"), body).unwrap();

        let out = FileOperationsTool
            .execute(&op(
                "search_files",
                dir.path().to_str().unwrap(),
                json!({"pattern": "hit", "max_results": 10}),
            ))
            .await;
        assert!(out.content.contains("match cap (10) reached"), "{}", out.content);
    }

    // ── dispatch ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_operation_is_error_output() {
        let out = FileOperationsTool
            .execute(&op("defragment", "/tmp", json!({})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown operation"));
    }

    #[tokio::test]
    async fn missing_operation_is_error_output() {
        let out = FileOperationsTool.execute(&call(json!({"path": "/tmp"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("'operation'"));
    }

    #[test]
    fn path_is_declared_for_sandboxing() {
        assert_eq!(FileOperationsTool.path_params(), ["path"]);
    }
}
