// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Soft sandbox: path-carrying tool parameters must resolve inside the
    /// session working directory.  Shell and network tools are not contained.
    #[serde(default)]
    pub sandbox: bool,
    /// Lowers the log level filter to DEBUG.
    #[serde(default)]
    pub debug: bool,
    /// Working-directory override.  When unset, the process cwd is used.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Config {
    /// Build a configuration from environment variables.
    ///
    /// Recognised variables: `CLIO_PROVIDER`, `CLIO_MODEL`, `CLIO_BASE_URL`,
    /// `CLIO_API_KEY`, `CLIO_SANDBOX`, `CLIO_DEBUG`, `CLIO_WORKDIR`.
    /// Per-provider credential variables (`OPENAI_API_KEY`, …) are resolved
    /// later by the driver registry; `CLIO_API_KEY` overrides them all.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        if let Ok(p) = std::env::var("CLIO_PROVIDER") {
            cfg.model.provider = p;
        }
        if let Ok(m) = std::env::var("CLIO_MODEL") {
            cfg.model.name = m;
        }
        if let Ok(u) = std::env::var("CLIO_BASE_URL") {
            cfg.model.base_url = Some(u);
        }
        if let Ok(k) = std::env::var("CLIO_API_KEY") {
            cfg.model.api_key = Some(k);
        }
        cfg.sandbox = env_flag("CLIO_SANDBOX");
        cfg.debug = env_flag("CLIO_DEBUG");
        if let Ok(wd) = std::env::var("CLIO_WORKDIR") {
            let expanded = shellexpand::tilde(&wd).into_owned();
            cfg.working_dir = Some(PathBuf::from(expanded));
        }
        cfg
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes") | Ok("on")
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" | "anthropic" | "google" | "openrouter" |
    /// "ollama" | "lmstudio" | "vllm" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Explicit API key; when unset the driver registry resolves the
    /// provider's canonical environment variable.
    pub api_key: Option<String>,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Base URL override.  Useful for local servers and proxies.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            // api_key_env is intentionally None here.  The driver registry
            // knows the canonical env-var name for each provider; hard-coding
            // one here would shadow that lookup when the provider changes.
            api_key: None,
            api_key_env: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
        }
    }
}

fn default_max_iterations() -> u32 {
    25
}
fn default_spill_threshold() -> usize {
    8 * 1024
}
fn default_response_buffer() -> usize {
    8000
}
fn default_token_ratio() -> f64 {
    2.5
}
fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_http_idle_timeout_secs() -> u64 {
    300
}
fn default_cancel_grace_secs() -> u64 {
    5
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model↔tool iterations within one turn before stopping.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Tool results larger than this many bytes are spilled to the result
    /// store and replaced with a placeholder the model can page through.
    #[serde(default = "default_spill_threshold")]
    pub spill_threshold: usize,
    /// Tokens reserved for the model response when computing the effective
    /// prompt budget.
    #[serde(default = "default_response_buffer")]
    pub response_buffer: usize,
    /// Rolling chars-per-token estimate used for all token accounting.
    #[serde(default = "default_token_ratio")]
    pub token_ratio: f64,
    /// Per-tool execution timeout.  Individual tools may override it.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// Idle timeout on the provider HTTP stream.
    #[serde(default = "default_http_idle_timeout_secs")]
    pub http_idle_timeout_secs: u64,
    /// Grace period an in-flight tool gets to finish after cancellation
    /// before the orchestrator force-terminates it.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    /// Retry attempts for retryable provider failures (5xx, 429, network).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base delay of the exponential backoff, in milliseconds.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            spill_threshold: default_spill_threshold(),
            response_buffer: default_response_buffer(),
            token_ratio: default_token_ratio(),
            tool_timeout_secs: default_tool_timeout_secs(),
            http_idle_timeout_secs: default_http_idle_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            retry_attempts: default_retry_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_defaults_match_documented_values() {
        let a = AgentConfig::default();
        assert_eq!(a.max_iterations, 25);
        assert_eq!(a.spill_threshold, 8192);
        assert_eq!(a.response_buffer, 8000);
        assert_eq!(a.token_ratio, 2.5);
        assert_eq!(a.tool_timeout_secs, 120);
        assert_eq!(a.http_idle_timeout_secs, 300);
        assert_eq!(a.cancel_grace_secs, 5);
        assert_eq!(a.retry_attempts, 3);
        assert_eq!(a.retry_base_ms, 1000);
    }

    #[test]
    fn model_default_is_openai() {
        let m = ModelConfig::default();
        assert_eq!(m.provider, "openai");
        assert!(m.api_key_env.is_none());
    }

    #[test]
    fn config_deserializes_from_partial_json() {
        let cfg: Config = serde_json::from_str(r#"{"sandbox": true}"#).unwrap();
        assert!(cfg.sandbox);
        assert_eq!(cfg.agent.max_iterations, 25);
        assert_eq!(cfg.model.provider, "openai");
    }

    #[test]
    fn agent_config_partial_json_fills_defaults() {
        let a: AgentConfig = serde_json::from_str(r#"{"max_iterations": 5}"#).unwrap();
        assert_eq!(a.max_iterations, 5);
        assert_eq!(a.spill_threshold, 8192);
    }
}
