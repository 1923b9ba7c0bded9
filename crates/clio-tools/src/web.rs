// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolInvocation, ToolOutput};

const DEFAULT_MAX_CHARS: usize = 50_000;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP fetch tool: GET and POST with a size cap and response truncation.
pub struct WebOperationsTool;

#[async_trait]
impl Tool for WebOperationsTool {
    fn name(&self) -> &str {
        "web_operations"
    }

    fn description(&self) -> &str {
        "Fetch content over HTTP.\n\
         http_get retrieves a URL; http_post sends 'body' (JSON string or plain\n\
         text) and returns the response.\n\
         HTML is converted to readable text, JSON is pretty-printed, and\n\
         responses are truncated to max_chars (default 50,000) with a notice.\n\
         HTTP and HTTPS only; no authentication support."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["http_get", "http_post"],
                    "description": "Request method"
                },
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                },
                "body": {
                    "type": "string",
                    "description": "Request body for http_post"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 50000)"
                }
            },
            "required": ["operation", "url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolOutput {
        let operation = match call.args.get("operation").and_then(|v| v.as_str()) {
            Some(op) => op.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'operation'"),
        };
        let url = match call.args.get("url").and_then(|v| v.as_str()) {
            Some(u) => u.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'url'"),
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutput::err(&call.id, "only http and https URLs are supported");
        }
        let max_chars = call
            .args
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_CHARS as u64) as usize;
        let body = call
            .args
            .get("body")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        debug!(operation = %operation, url = %url, "web_operations tool");

        let result = match operation.as_str() {
            "http_get" => fetch(&url, None, max_chars).await,
            "http_post" => fetch(&url, Some(body.unwrap_or_default()), max_chars).await,
            other => return ToolOutput::err(&call.id, format!("unknown operation: {other}")),
        };

        match result {
            Ok(content) => ToolOutput::ok(&call.id, content),
            Err(e) => ToolOutput::err(&call.id, format!("fetch error: {e}")),
        }
    }
}

async fn fetch(url: &str, post_body: Option<String>, max_chars: usize) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .redirect(reqwest::redirect::Policy::limited(3))
        .user_agent("clio-agent/0.9")
        .build()?;

    let request = match post_body {
        Some(body) => {
            let builder = client.post(url);
            // Send JSON as JSON when the body parses; fall back to plain text.
            match serde_json::from_str::<Value>(&body) {
                Ok(v) => builder.json(&v),
                Err(_) => builder.body(body),
            }
        }
        None => client.get(url),
    };

    let response = request.send().await?;
    let status = response.status();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();
    let body = response.text().await?;

    let content = if content_type.contains("html") {
        html_to_text(&body)
    } else if content_type.contains("json") {
        match serde_json::from_str::<Value>(&body) {
            Ok(v) => serde_json::to_string_pretty(&v).unwrap_or(body),
            Err(_) => body,
        }
    } else {
        body
    };

    let prefixed = if status.is_success() {
        content
    } else {
        format!("[HTTP {status}]\n{content}")
    };

    Ok(truncate_chars(&prefixed, max_chars))
}

/// Cut at a char boundary with a notice; never slices mid-UTF-8.
fn truncate_chars(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let cut: String = content.chars().take(max_chars).collect();
    format!(
        "{cut}...[truncated at {max_chars} chars; total {} chars]",
        content.chars().count()
    )
}

fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100)
}
