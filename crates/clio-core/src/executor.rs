// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, warn};

use clio_log::ToolOpsLog;
use clio_model::{Message, ToolCall};
use clio_tools::{ToolInvocation, ToolRegistry};

use crate::jsonutil::{canonical_json, utf8_preview};
use crate::result_store::ResultStore;

/// Preview bytes embedded in a spill placeholder.
const SPILL_PREVIEW_BYTES: usize = 256;

/// Cap on the `output` field written to the tool-operations log.
const LOG_OUTPUT_CAP: usize = 2000;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Soft sandbox: contain path-carrying parameters to the working dir.
    pub sandbox: bool,
    /// The session's working directory (absolute).
    pub working_dir: PathBuf,
    /// Results larger than this many bytes are spilled to the result store.
    pub spill_threshold: usize,
    /// Timeout for tools that do not declare their own.
    pub default_timeout_secs: u64,
}

/// The result of running one tool call, ready for the session and the UI.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// The `tool` message to append (spill placeholder when spilled).
    pub message: Message,
    /// What the user should see (never the placeholder).
    pub display: String,
    pub success: bool,
    pub duration_ms: u64,
}

/// Dispatches tool calls: schema validation, sandbox gate, timeout, spill,
/// timing, and the per-call log entry.  Failures of every kind come back as
/// error *results* so the loop can continue.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    results: Arc<ResultStore>,
    ops_log: Option<ToolOpsLog>,
    config: ExecutorConfig,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        results: Arc<ResultStore>,
        ops_log: Option<ToolOpsLog>,
        config: ExecutorConfig,
    ) -> Self {
        Self { registry, results, ops_log, config }
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        let started = Instant::now();
        let operation = call
            .arguments
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("execute")
            .to_string();

        let raw = self.run_checked(call).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let success = !raw.is_error;

        // Oversize results are spilled; the model sees a placeholder it can
        // page through with read_tool_result.
        let (sent_to_ai, action) = if success && raw.content.len() > self.config.spill_threshold {
            match self.results.put(raw.content.as_bytes()) {
                Ok(result_id) => {
                    let placeholder = json!({
                        "_stored": true,
                        "result_id": result_id,
                        "size": raw.content.len(),
                        "preview": utf8_preview(&raw.content, SPILL_PREVIEW_BYTES),
                    });
                    debug!(
                        tool = %call.name,
                        size = raw.content.len(),
                        "tool result spilled to result store"
                    );
                    (canonical_json(&placeholder), format!("{operation} (result spilled)"))
                }
                Err(e) => {
                    warn!(error = %e, "result spill failed; sending truncated result");
                    (utf8_preview(&raw.content, self.config.spill_threshold), operation.clone())
                }
            }
        } else {
            (raw.content.clone(), operation.clone())
        };

        if let Some(log) = &self.ops_log {
            log.record(
                &call.id,
                &call.name,
                &operation,
                call.arguments.clone(),
                &utf8_preview(&raw.content, LOG_OUTPUT_CAP),
                &action,
                &utf8_preview(&sent_to_ai, LOG_OUTPUT_CAP),
                success,
                duration_ms,
                (!success).then(|| raw.content.clone()),
            );
        }

        let mut message = Message::tool_result(&call.id, &sent_to_ai);
        message.name = Some(call.name.clone());

        ToolOutcome {
            message,
            display: raw.content,
            success,
            duration_ms,
        }
    }

    /// Lookup, validate, sandbox-check, and run with a timeout.  Every
    /// failure path returns an error output.
    async fn run_checked(&self, call: &ToolCall) -> clio_tools::ToolOutput {
        use clio_tools::ToolOutput;

        let Some(tool) = self.registry.get(&call.name) else {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        };

        if let Err(msg) = validate_args(&tool.parameters_schema(), &call.arguments) {
            return ToolOutput::err(&call.id, format!("invalid arguments: {msg}"));
        }

        if self.config.sandbox {
            for param in tool.path_params() {
                if let Some(raw_path) = call.arguments.get(*param).and_then(|v| v.as_str()) {
                    if !path_contained(raw_path, &self.config.working_dir) {
                        return ToolOutput::err(
                            &call.id,
                            format!(
                                "sandbox: {param} {raw_path:?} is outside the working directory {}",
                                self.config.working_dir.display()
                            ),
                        );
                    }
                }
            }
        }

        let invocation = ToolInvocation {
            id: call.id.clone(),
            name: call.name.clone(),
            args: call.arguments.clone(),
        };
        let timeout = tool
            .timeout_secs()
            .unwrap_or(self.config.default_timeout_secs);

        match tokio::time::timeout(
            std::time::Duration::from_secs(timeout),
            tool.execute(&invocation),
        )
        .await
        {
            Ok(output) => output,
            Err(_) => ToolOutput::err(&call.id, format!("tool timed out after {timeout}s")),
        }
    }
}

/// Check declared-schema conformance: required fields, primitive types, and
/// enum membership.  Unknown extra fields are tolerated.
pub(crate) fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(args_obj) = args.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for req in required {
            let Some(name) = req.as_str() else { continue };
            if !args_obj.contains_key(name) {
                return Err(format!("missing required parameter '{name}'"));
            }
        }
    }

    let Some(props) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };
    for (name, subschema) in props {
        let Some(value) = args_obj.get(name) else { continue };
        if let Some(expected) = subschema.get("type").and_then(|t| t.as_str()) {
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(format!("parameter '{name}' must be of type {expected}"));
            }
        }
        if let Some(allowed) = subschema.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(value) {
                return Err(format!(
                    "parameter '{name}' must be one of {}",
                    canonical_json(&Value::Array(allowed.clone()))
                ));
            }
        }
    }
    Ok(())
}

/// Lexical containment check: `path`, resolved against `root` when relative,
/// must stay at or below `root`.  `..` segments are resolved without touching
/// the filesystem so nonexistent targets are checked too.
pub(crate) fn path_contained(path: &str, root: &Path) -> bool {
    let candidate = Path::new(path);
    let absolute = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return false;
                }
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized.starts_with(root)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
