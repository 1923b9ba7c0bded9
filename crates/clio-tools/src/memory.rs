// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::tool::{Tool, ToolInvocation, ToolOutput};

/// Where a memory entry lives.
///
/// Short-term entries vanish with the process; long-term entries persist on
/// disk across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    ShortTerm,
    LongTerm,
}

impl MemoryScope {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "short_term" => Some(Self::ShortTerm),
            "long_term" => Some(Self::LongTerm),
            _ => None,
        }
    }
}

/// Pluggable memory store with opaque keys.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn store(&self, scope: MemoryScope, key: &str, value: &str) -> anyhow::Result<()>;
    async fn retrieve(&self, scope: MemoryScope, key: &str) -> anyhow::Result<Option<String>>;
    async fn list(&self, scope: MemoryScope) -> anyhow::Result<Vec<String>>;
}

/// Default backend: short-term entries in process memory, long-term entries
/// in a single JSON file.
pub struct FileMemory {
    short: Mutex<HashMap<String, String>>,
    long_path: PathBuf,
    long: Mutex<HashMap<String, String>>,
}

impl FileMemory {
    pub fn new(long_path: impl Into<PathBuf>) -> Self {
        let long_path = long_path.into();
        let long = std::fs::read_to_string(&long_path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self {
            short: Mutex::new(HashMap::new()),
            long_path,
            long: Mutex::new(long),
        }
    }

    async fn persist_long(&self, entries: &HashMap<String, String>) -> anyhow::Result<()> {
        if let Some(parent) = self.long_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.long_path, text).await?;
        Ok(())
    }
}

#[async_trait]
impl MemoryBackend for FileMemory {
    async fn store(&self, scope: MemoryScope, key: &str, value: &str) -> anyhow::Result<()> {
        match scope {
            MemoryScope::ShortTerm => {
                self.short.lock().await.insert(key.to_string(), value.to_string());
            }
            MemoryScope::LongTerm => {
                let mut long = self.long.lock().await;
                long.insert(key.to_string(), value.to_string());
                self.persist_long(&long).await?;
            }
        }
        Ok(())
    }

    async fn retrieve(&self, scope: MemoryScope, key: &str) -> anyhow::Result<Option<String>> {
        let map = match scope {
            MemoryScope::ShortTerm => self.short.lock().await,
            MemoryScope::LongTerm => self.long.lock().await,
        };
        Ok(map.get(key).cloned())
    }

    async fn list(&self, scope: MemoryScope) -> anyhow::Result<Vec<String>> {
        let map = match scope {
            MemoryScope::ShortTerm => self.short.lock().await,
            MemoryScope::LongTerm => self.long.lock().await,
        };
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Tool surface over a [`MemoryBackend`].
pub struct MemoryTool {
    backend: Arc<dyn MemoryBackend>,
}

impl MemoryTool {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory_operations"
    }

    fn description(&self) -> &str {
        "Store and retrieve notes across the conversation.\n\
         Scopes: short_term (this process only) and long_term (persists across\n\
         sessions). store requires key + value; retrieve requires key; list\n\
         returns all keys in the scope."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["store", "retrieve", "list"],
                    "description": "Memory operation"
                },
                "scope": {
                    "type": "string",
                    "enum": ["short_term", "long_term"],
                    "description": "Which store to use"
                },
                "key": {
                    "type": "string",
                    "description": "Opaque entry key"
                },
                "value": {
                    "type": "string",
                    "description": "Entry content (store only)"
                }
            },
            "required": ["operation", "scope"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutput {
        let operation = match call.args.get("operation").and_then(|v| v.as_str()) {
            Some(op) => op,
            None => return ToolOutput::err(&call.id, "missing required parameter 'operation'"),
        };
        let scope = match call
            .args
            .get("scope")
            .and_then(|v| v.as_str())
            .and_then(MemoryScope::parse)
        {
            Some(s) => s,
            None => {
                return ToolOutput::err(
                    &call.id,
                    "scope must be 'short_term' or 'long_term'",
                )
            }
        };

        debug!(operation, ?scope, "memory_operations tool");

        match operation {
            "store" => {
                let (Some(key), Some(value)) = (
                    call.args.get("key").and_then(|v| v.as_str()),
                    call.args.get("value").and_then(|v| v.as_str()),
                ) else {
                    return ToolOutput::err(&call.id, "store requires 'key' and 'value'");
                };
                match self.backend.store(scope, key, value).await {
                    Ok(()) => ToolOutput::ok(&call.id, format!("stored '{key}'")),
                    Err(e) => ToolOutput::err(&call.id, format!("store error: {e}")),
                }
            }
            "retrieve" => {
                let Some(key) = call.args.get("key").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "retrieve requires 'key'");
                };
                match self.backend.retrieve(scope, key).await {
                    Ok(Some(value)) => ToolOutput::ok(&call.id, value),
                    Ok(None) => ToolOutput::ok(&call.id, format!("[no entry for '{key}']")),
                    Err(e) => ToolOutput::err(&call.id, format!("retrieve error: {e}")),
                }
            }
            "list" => match self.backend.list(scope).await {
                Ok(keys) if keys.is_empty() => ToolOutput::ok(&call.id, "[no entries]"),
                Ok(keys) => ToolOutput::ok(&call.id, keys.join("\n")),
                Err(e) => ToolOutput::err(&call.id, format!("list error: {e}")),
            },
            other => ToolOutput::err(&call.id, format!("unknown operation: {other}")),
        }
    }
}
