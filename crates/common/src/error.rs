//! Error types for common collaborators

use thiserror::Error;

/// Errors raised by the crypto and storage collaborators.
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias for common collaborators.
pub type CommonResult<T> = Result<T, CommonError>;
