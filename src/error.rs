//! Domain-specific error types for the measurement core.

use thiserror::Error;

/// Main error type for the logitprobe measurement core.
#[derive(Error, Debug)]
pub enum LogitProbeError {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("prompt bank not found: {version}")]
    PromptNotFound { version: String },

    #[error("prompt bank malformed: {message}")]
    PromptMalformed { message: String },

    #[error("composed prompt exceeds max_prompt_chars ({len} > {max})")]
    PromptTooLong { len: usize, max: usize },

    #[error("provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("provider returned a schema violation: {message}")]
    ProviderSchemaViolation { message: String },

    #[error("no compliant samples were collected for this run")]
    NoValidSamples,

    #[error("storage failure: {message}")]
    StorageFailure { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl From<serde_json::Error> for LogitProbeError {
    fn from(err: serde_json::Error) -> Self {
        LogitProbeError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for LogitProbeError {
    fn from(err: rusqlite::Error) -> Self {
        LogitProbeError::StorageFailure {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for LogitProbeError {
    fn from(err: reqwest::Error) -> Self {
        LogitProbeError::ProviderUnavailable {
            message: format!("HTTP request failed: {err}"),
        }
    }
}

impl From<toml::de::Error> for LogitProbeError {
    fn from(err: toml::de::Error) -> Self {
        LogitProbeError::PromptMalformed {
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for LogitProbeError {
    fn from(err: anyhow::Error) -> Self {
        LogitProbeError::Internal {
            message: err.to_string(),
        }
    }
}

/// Result type alias for logitprobe operations.
pub type Result<T> = std::result::Result<T, LogitProbeError>;
