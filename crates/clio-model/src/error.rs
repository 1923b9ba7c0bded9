// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Failures raised by provider adapters.
///
/// The orchestrator retries [`ProviderError::is_retryable`] failures with
/// exponential backoff; everything else is fatal for the turn.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection, DNS, TLS, or mid-stream transport failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The provider answered with a non-success HTTP status.
    #[error("{provider} error {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    /// The idle timeout elapsed while waiting for stream data.
    #[error("provider stream idle for {0} seconds")]
    IdleTimeout(u64),

    /// The response violated the provider's own wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No credential available for a provider that requires one.
    #[error("missing API key: set {0}")]
    MissingKey(String),
}

impl ProviderError {
    /// Transient failures worth retrying: transport errors, timeouts,
    /// rate limiting (429), and server-side errors (5xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::IdleTimeout(_) => true,
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Protocol(_) | ProviderError::MissingKey(_) => false,
        }
    }
}
