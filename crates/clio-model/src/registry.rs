// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
//! Driver registry: static metadata for every supported model provider.
//!
//! This module is the single source of truth for which provider ids exist and
//! what their defaults are.  Construction happens in [`from_config`].

use anyhow::bail;

use clio_config::ModelConfig;

use crate::{
    openai::{AuthStyle, OpenAiCompatProvider},
    AnthropicProvider, GoogleProvider, MockProvider, Provider,
};

/// Metadata describing a registered model driver.
#[derive(Debug, Clone)]
pub struct DriverMeta {
    /// Unique provider id used in the `CLIO_PROVIDER` setting.
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    pub description: &'static str,
    /// Default environment variable that holds the API key.  `None` for
    /// providers that require no key (local servers).
    pub default_api_key_env: Option<&'static str>,
    /// Default base URL when none is configured.
    pub default_base_url: Option<&'static str>,
    pub requires_api_key: bool,
}

pub static DRIVERS: &[DriverMeta] = &[
    DriverMeta {
        id: "openai",
        name: "OpenAI",
        description: "OpenAI GPT and o-series models",
        default_api_key_env: Some("OPENAI_API_KEY"),
        default_base_url: Some("https://api.openai.com/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "anthropic",
        name: "Anthropic",
        description: "Anthropic Claude models",
        default_api_key_env: Some("ANTHROPIC_API_KEY"),
        default_base_url: Some("https://api.anthropic.com"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "google",
        name: "Google Gemini",
        description: "Google Gemini models via the Generative Language API",
        default_api_key_env: Some("GEMINI_API_KEY"),
        default_base_url: Some("https://generativelanguage.googleapis.com"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "openrouter",
        name: "OpenRouter",
        description: "OpenAI-compatible multi-model gateway",
        default_api_key_env: Some("OPENROUTER_API_KEY"),
        default_base_url: Some("https://openrouter.ai/api/v1"),
        requires_api_key: true,
    },
    DriverMeta {
        id: "ollama",
        name: "Ollama",
        description: "Local models via the Ollama OpenAI-compatible endpoint",
        default_api_key_env: None,
        default_base_url: Some("http://localhost:11434/v1"),
        requires_api_key: false,
    },
    DriverMeta {
        id: "lmstudio",
        name: "LM Studio",
        description: "Local models via the LM Studio server",
        default_api_key_env: None,
        default_base_url: Some("http://localhost:1234/v1"),
        requires_api_key: false,
    },
    DriverMeta {
        id: "vllm",
        name: "vLLM",
        description: "Local or self-hosted vLLM server",
        default_api_key_env: None,
        default_base_url: Some("http://localhost:8000/v1"),
        requires_api_key: false,
    },
    DriverMeta {
        id: "mock",
        name: "Mock",
        description: "Deterministic offline provider for tests",
        default_api_key_env: None,
        default_base_url: None,
        requires_api_key: false,
    },
];

pub fn get_driver(id: &str) -> Option<&'static DriverMeta> {
    DRIVERS.iter().find(|d| d.id == id)
}

pub fn list_drivers() -> impl Iterator<Item = &'static DriverMeta> {
    DRIVERS.iter()
}

pub fn known_driver_ids() -> impl Iterator<Item = &'static str> {
    DRIVERS.iter().map(|d| d.id)
}

/// Construct a boxed [`Provider`] from configuration.
///
/// `idle_timeout_secs` bounds how long a stream may sit silent before the
/// read is abandoned.
pub fn from_config(cfg: &ModelConfig, idle_timeout_secs: u64) -> anyhow::Result<Box<dyn Provider>> {
    let key = resolve_api_key(cfg);
    let base_url = |default: &str| -> String {
        cfg.base_url.clone().unwrap_or_else(|| default.into())
    };

    match cfg.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiCompatProvider::new(
            "openai",
            cfg.name.clone(),
            key,
            "OPENAI_API_KEY",
            &base_url("https://api.openai.com/v1"),
            cfg.max_tokens,
            cfg.temperature,
            vec![],
            AuthStyle::Bearer,
            idle_timeout_secs,
        ))),
        "openrouter" => Ok(Box::new(OpenAiCompatProvider::new(
            "openrouter",
            cfg.name.clone(),
            key,
            "OPENROUTER_API_KEY",
            &base_url("https://openrouter.ai/api/v1"),
            cfg.max_tokens,
            cfg.temperature,
            vec![("X-Title".into(), "clio".into())],
            AuthStyle::Bearer,
            idle_timeout_secs,
        ))),
        "anthropic" => Ok(Box::new(AnthropicProvider::new(
            cfg.name.clone(),
            key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
            idle_timeout_secs,
        ))),
        "google" => Ok(Box::new(GoogleProvider::new(
            cfg.name.clone(),
            key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
            idle_timeout_secs,
        ))),
        "ollama" => Ok(Box::new(OpenAiCompatProvider::new(
            "ollama",
            cfg.name.clone(),
            None,
            "",
            &base_url("http://localhost:11434/v1"),
            cfg.max_tokens,
            cfg.temperature,
            vec![],
            AuthStyle::None,
            idle_timeout_secs,
        ))),
        "lmstudio" => Ok(Box::new(OpenAiCompatProvider::new(
            "lmstudio",
            cfg.name.clone(),
            None,
            "",
            &base_url("http://localhost:1234/v1"),
            cfg.max_tokens,
            cfg.temperature,
            vec![],
            AuthStyle::None,
            idle_timeout_secs,
        ))),
        "vllm" => Ok(Box::new(OpenAiCompatProvider::new(
            "vllm",
            cfg.name.clone(),
            key.clone(),
            "",
            &base_url("http://localhost:8000/v1"),
            cfg.max_tokens,
            cfg.temperature,
            vec![],
            if key.is_some() { AuthStyle::Bearer } else { AuthStyle::None },
            idle_timeout_secs,
        ))),
        "mock" => Ok(Box::new(MockProvider)),
        other => {
            let known: Vec<&str> = known_driver_ids().collect();
            bail!(
                "unknown model provider: {other:?}\n\
                 Known providers: {known}",
                known = known.join(", ")
            )
        }
    }
}

fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(env) = &cfg.api_key_env {
        return std::env::var(env).ok();
    }
    // Fall through to the driver's canonical env var.
    if let Some(meta) = get_driver(&cfg.provider) {
        if let Some(env_var) = meta.default_api_key_env {
            return std::env::var(env_var).ok();
        }
    }
    None
}
