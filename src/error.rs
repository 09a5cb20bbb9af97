//! Error types for token discovery and alert validation

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the radar
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (fail fast at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown relaxation level: {0}")]
    UnknownRelaxationLevel(u8),

    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),

    // Upstream provider errors
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider request timed out after {0}ms")]
    ProviderTimeout(u64),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // Security classifier errors
    #[error("Security classification failed: {0}")]
    Classifier(String),

    // Persistence errors
    #[error("Persistence error for '{key}': {reason}")]
    Persistence { key: String, reason: String },

    // Notification errors
    #[error("Notification sink error: {0}")]
    Sink(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Provider(_) | Error::ProviderTimeout(_) | Error::Http(_) | Error::Sink(_)
        )
    }

    /// Check if this error is a startup configuration problem
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::UnknownRelaxationLevel(_) | Error::InvalidRegex(_)
        )
    }

    pub(crate) fn persistence(key: impl Into<String>, reason: impl ToString) -> Self {
        Error::Persistence {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::MalformedResponse(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::InvalidRegex(e.to_string())
    }
}
