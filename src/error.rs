//! Error types for the router.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors raised while talking to a model backend.
///
/// Adapters return these without rewriting them; the fallback controller
/// classifies them and, once every candidate has failed, hands the last one
/// back to the caller as-is.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} rate limited, retry after {retry_after:?}: {reason}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
        reason: String,
    },

    #[error("Authentication failed for provider {provider}: {reason}")]
    AuthFailed { provider: String, reason: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Model {model} is not in the catalog")]
    UnknownModel { model: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
