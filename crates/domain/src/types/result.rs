//! Operation result envelope
//!
//! The public surface of the calendar layer never returns a bare `Err`:
//! every operation resolves to a [`CalendarOperationResult`] carrying either
//! data or a structured, retry-classified error the caller can present.

use serde::{Deserialize, Serialize};

use crate::errors::CalendarError;

/// Structured error surfaced to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&CalendarError> for OperationError {
    fn from(err: &CalendarError) -> Self {
        Self { code: err.code(), message: err.to_string(), retryable: err.is_retryable() }
    }
}

/// Uniform envelope for every public calendar operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarOperationResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl<T> CalendarOperationResult<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    #[must_use]
    pub fn err(error: &CalendarError) -> Self {
        Self { success: false, data: None, error: Some(OperationError::from(error)) }
    }

    /// Error code, when the operation failed.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

impl<T> From<Result<T, CalendarError>> for CalendarOperationResult<T> {
    fn from(result: Result<T, CalendarError>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::err(&err),
        }
    }
}
