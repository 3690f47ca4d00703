//! Error types for the tamer batch transformation system.

use thiserror::Error;

/// Errors surfaced by the prompt, batch and transform layers.
///
/// Provider and validation variants come from a single generation attempt and
/// are retried by the retry controller; they reach the caller as the very same
/// value once the retry budget is spent.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimit(String),

    #[error("Provider model not found: {0}")]
    ProviderModelNotFound(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Batch {batch_index} result callback failed: {message}")]
    CallbackFailed { batch_index: usize, message: String },
}

impl ApiError {
    /// Whether a failed generation attempt may be run again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ApiError::ConfigError(_)
                | ApiError::ProviderNotConfigured(_)
                | ApiError::CallbackFailed { .. }
        )
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::SchemaValidation(err.to_string())
    }
}
