// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Per-model capability records used for budgeting and feature gating.

use serde::{Deserialize, Serialize};

/// Prompt budget assumed for local/loopback endpoints with no catalog entry.
pub const LOCAL_FALLBACK_PROMPT_TOKENS: u32 = 32_000;

/// Prompt budget assumed for unknown hosted models.
pub const REMOTE_FALLBACK_PROMPT_TOKENS: u32 = 128_000;

/// Providers that serve models from the local machine.
const LOCAL_PROVIDERS: &[&str] = &["ollama", "lmstudio", "vllm", "llamacpp"];

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityRecord {
    /// Provider-scoped model identifier (e.g. "gpt-4o", "claude-sonnet-4-5")
    pub id: String,
    /// Provider identifier: "openai" | "anthropic" | "google" | …
    pub provider: String,
    /// Maximum prompt tokens the model accepts.
    pub max_prompt_tokens: u32,
    #[serde(default = "default_true")]
    pub supports_tools: bool,
    #[serde(default = "default_true")]
    pub supports_streaming: bool,
    #[serde(default)]
    pub supports_thinking: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct CapabilityFile {
    models: Vec<CapabilityRecord>,
}

/// Return all entries from the bundled static table.
pub fn static_table() -> Vec<CapabilityRecord> {
    let yaml = include_str!("../capabilities.yaml");
    let table: CapabilityFile =
        serde_yaml::from_str(yaml).expect("bundled capabilities.yaml must be valid");
    table.models
}

/// Look up a single model by provider and id.
pub fn lookup(provider: &str, model_id: &str) -> Option<CapabilityRecord> {
    static_table()
        .into_iter()
        .find(|e| e.provider == provider && e.id == model_id)
}

/// True when the provider id or base URL points at this machine.
pub fn is_local_endpoint(provider: &str, base_url: Option<&str>) -> bool {
    if LOCAL_PROVIDERS.contains(&provider) {
        return true;
    }
    match base_url {
        Some(url) => {
            let host = url
                .trim_start_matches("http://")
                .trim_start_matches("https://");
            host.starts_with("localhost") || host.starts_with("127.0.0.1")
        }
        None => false,
    }
}

/// Resolve the prompt budget for a model: catalog entry when known, then the
/// local-endpoint heuristic, then the hosted-model fallback.
pub fn max_prompt_tokens(provider: &str, model_id: &str, base_url: Option<&str>) -> u32 {
    if let Some(rec) = lookup(provider, model_id) {
        return rec.max_prompt_tokens;
    }
    if is_local_endpoint(provider, base_url) {
        LOCAL_FALLBACK_PROMPT_TOKENS
    } else {
        REMOTE_FALLBACK_PROMPT_TOKENS
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
