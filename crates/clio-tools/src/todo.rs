// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::tool::{Tool, ToolInvocation, ToolOutput};

/// A structured todo item managed by the todo_write tool.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled"
    pub status: String,
}

/// In-session task tracker.  Each call replaces the whole list.
pub struct TodoWriteTool {
    todos: Arc<Mutex<Vec<TodoItem>>>,
}

impl TodoWriteTool {
    pub fn new(todos: Arc<Mutex<Vec<TodoItem>>>) -> Self {
        Self { todos }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create and manage a structured task list for the current session.\n\n\
         ## Task statuses\n\
         - pending: not yet started\n\
         - in_progress: currently being worked on (only ONE at a time)\n\
         - completed: finished successfully\n\
         - cancelled: no longer relevant\n\n\
         ## When to use\n\
         Complex multi-step tasks (3+ distinct steps), or when the user\n\
         provides multiple tasks to accomplish.  Skip for single trivial\n\
         tasks and purely conversational requests.\n\n\
         ## IMPORTANT\n\
         - Each item requires a unique id, content, and status\n\
         - Calling todo_write replaces the entire list (not a merge)\n\
         - Mark items completed immediately after finishing them"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Array of todo items to set (replaces existing list)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {
                                "type": "string",
                                "description": "Unique identifier for the task"
                            },
                            "content": {
                                "type": "string",
                                "description": "Description of the task"
                            },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "cancelled"],
                                "description": "Current status of the task"
                            }
                        },
                        "required": ["id", "content", "status"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutput {
        let todos_value = match call.args.get("todos").and_then(|v| v.as_array()) {
            Some(arr) => arr.clone(),
            None => return ToolOutput::err(&call.id, "missing 'todos' array"),
        };

        let mut items: Vec<TodoItem> = Vec::new();
        for item in &todos_value {
            let id = match item.get("id").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.id, "todo item missing 'id'"),
            };
            let content = match item.get("content").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.id, format!("todo '{id}' missing 'content'")),
            };
            let status = match item.get("status").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.id, format!("todo '{id}' missing 'status'")),
            };
            if !["pending", "in_progress", "completed", "cancelled"].contains(&status.as_str()) {
                return ToolOutput::err(
                    &call.id,
                    format!("invalid status '{status}' for todo '{id}'"),
                );
            }
            items.push(TodoItem { id, content, status });
        }

        let in_progress = items.iter().filter(|t| t.status == "in_progress").count();
        if in_progress > 1 {
            return ToolOutput::err(&call.id, "at most one todo can be 'in_progress' at a time");
        }

        debug!(count = items.len(), "todo_write tool");

        *self.todos.lock().await = items.clone();
        ToolOutput::ok(&call.id, format_todos(&items))
    }
}

fn format_todos(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "Todo list cleared.".to_string();
    }
    let lines: Vec<String> = items
        .iter()
        .map(|t| {
            let icon = match t.status.as_str() {
                "completed" => "✓",
                "in_progress" => "→",
                "cancelled" => "✗",
                _ => "○",
            };
            format!("{icon} [{}] {}", t.id, t.content)
        })
        .collect();
    format!("Todos updated:\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn make_tool() -> (TodoWriteTool, Arc<Mutex<Vec<TodoItem>>>) {
        let todos = Arc::new(Mutex::new(Vec::new()));
        (TodoWriteTool::new(todos.clone()), todos)
    }

    fn call(args: Value) -> ToolInvocation {
        ToolInvocation { id: "t1".into(), name: "todo_write".into(), args }
    }

    #[tokio::test]
    async fn sets_todos() {
        let (tool, todos) = make_tool();
        let out = tool
            .execute(&call(json!({
                "todos": [
                    {"id": "1", "content": "do something", "status": "pending"},
                    {"id": "2", "content": "working on it", "status": "in_progress"}
                ]
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let locked = todos.lock().await;
        assert_eq!(locked.len(), 2);
        assert_eq!(locked[0].id, "1");
    }

    #[tokio::test]
    async fn replaces_rather_than_merges() {
        let (tool, todos) = make_tool();
        tool.execute(&call(json!({
            "todos": [{"id": "1", "content": "a", "status": "pending"}]
        })))
        .await;
        tool.execute(&call(json!({
            "todos": [{"id": "2", "content": "b", "status": "pending"}]
        })))
        .await;
        let locked = todos.lock().await;
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].id, "2");
    }

    #[tokio::test]
    async fn rejects_multiple_in_progress() {
        let (tool, _todos) = make_tool();
        let out = tool
            .execute(&call(json!({
                "todos": [
                    {"id": "1", "content": "a", "status": "in_progress"},
                    {"id": "2", "content": "b", "status": "in_progress"}
                ]
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("at most one"));
    }

    #[tokio::test]
    async fn rejects_invalid_status() {
        let (tool, _todos) = make_tool();
        let out = tool
            .execute(&call(json!({
                "todos": [{"id": "1", "content": "a", "status": "paused"}]
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid status"));
    }

    #[tokio::test]
    async fn empty_list_clears() {
        let (tool, todos) = make_tool();
        tool.execute(&call(json!({
            "todos": [{"id": "1", "content": "a", "status": "pending"}]
        })))
        .await;
        let out = tool.execute(&call(json!({"todos": []}))).await;
        assert!(out.content.contains("cleared"));
        assert!(todos.lock().await.is_empty());
    }

    #[tokio::test]
    async fn missing_todos_is_error() {
        let (tool, _todos) = make_tool();
        let out = tool.execute(&call(json!({}))).await;
        assert!(out.is_error);
    }
}
