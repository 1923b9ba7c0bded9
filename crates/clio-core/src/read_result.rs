// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use clio_tools::{Tool, ToolInvocation, ToolOutput};

use crate::result_store::ResultStore;

/// Default chunk size when the model does not ask for a specific length.
const DEFAULT_CHUNK_LEN: usize = 8192;

/// Largest chunk a single call may request.
const MAX_CHUNK_LEN: usize = 65_536;

/// Built-in tool for paging through spilled results.
///
/// Lives next to the store it reads: when the executor replaces an oversize
/// result with a `{_stored: true, result_id, …}` placeholder, the model uses
/// this tool to fetch the content in bounded chunks.
pub struct ReadToolResultTool {
    store: Arc<ResultStore>,
}

impl ReadToolResultTool {
    pub fn new(store: Arc<ResultStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadToolResultTool {
    fn name(&self) -> &str {
        "read_tool_result"
    }

    fn description(&self) -> &str {
        "Read a chunk of a stored tool result.\n\
         Large tool outputs are replaced by a placeholder\n\
         {\"_stored\": true, \"result_id\": …, \"size\": …, \"preview\": …};\n\
         pass that result_id here with offset/length (bytes, default length\n\
         8192) to page through the full content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result_id": {
                    "type": "string",
                    "description": "Id from a stored-result placeholder"
                },
                "offset": {
                    "type": "integer",
                    "description": "Byte offset to start reading at (default 0)"
                },
                "length": {
                    "type": "integer",
                    "description": "Bytes to read (default 8192, max 65536)"
                }
            },
            "required": ["result_id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutput {
        let result_id = match call.args.get("result_id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'result_id'"),
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0);
        let length = call
            .args
            .get("length")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_CHUNK_LEN as u64) as usize;
        if length == 0 || length > MAX_CHUNK_LEN {
            return ToolOutput::err(
                &call.id,
                format!("length must be between 1 and {MAX_CHUNK_LEN}"),
            );
        }

        let total = match self.store.size(&result_id) {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("{e:#}")),
        };
        let chunk = match self.store.get(&result_id, offset, length) {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, format!("{e:#}")),
        };

        let mut content = String::from_utf8_lossy(&chunk).into_owned();
        let end = offset + chunk.len() as u64;
        if end < total {
            content.push_str(&format!(
                "\n[bytes {offset}..{end} of {total}; continue with offset={end}]"
            ));
        }
        ToolOutput::ok(&call.id, content)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn setup() -> (ReadToolResultTool, Arc<ResultStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ResultStore::new(dir.path().join("results")));
        (ReadToolResultTool::new(store.clone()), store, dir)
    }

    fn call(args: serde_json::Value) -> ToolInvocation {
        ToolInvocation { id: "r1".into(), name: "read_tool_result".into(), args }
    }

    #[tokio::test]
    async fn first_chunk_of_spilled_result() {
        let (tool, store, _d) = setup();
        let id = store.put(&vec![b'x'; 32_768]).unwrap();

        let out = tool
            .execute(&call(json!({"result_id": id, "offset": 0, "length": 8192})))
            .await;
        assert!(!out.is_error);
        assert!(out.content.starts_with(&"x".repeat(100)));
        assert!(out.content.contains("bytes 0..8192 of 32768"));
        assert!(out.content.contains("offset=8192"));
    }

    #[tokio::test]
    async fn final_chunk_has_no_continuation_notice() {
        let (tool, store, _d) = setup();
        let id = store.put(b"short result").unwrap();
        let out = tool.execute(&call(json!({"result_id": id}))).await;
        assert_eq!(out.content, "short result");
    }

    #[tokio::test]
    async fn unknown_id_is_error_output() {
        let (tool, _s, _d) = setup();
        let out = tool.execute(&call(json!({"result_id": "r_missing"}))).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn zero_or_oversize_length_rejected() {
        let (tool, store, _d) = setup();
        let id = store.put(b"data").unwrap();
        let out = tool
            .execute(&call(json!({"result_id": id, "length": 0})))
            .await;
        assert!(out.is_error);
        let out = tool
            .execute(&call(json!({"result_id": id, "length": MAX_CHUNK_LEN + 1})))
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn missing_result_id_is_error() {
        let (tool, _s, _d) = setup();
        let out = tool.execute(&call(json!({}))).await;
        assert!(out.is_error);
    }
}
