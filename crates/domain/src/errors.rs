//! Error types used throughout the calendar layer
//!
//! [`CalendarError`] is the internal error currency; it maps onto the wire
//! error codes carried by the operation result envelope. Retryability follows
//! the provider semantics: 401 and 5xx responses may succeed after a token
//! refresh or backoff, validation and logic failures never will.

use thiserror::Error;

use crate::types::{CalendarEvent, CalendarProvider};

/// Main error type for calendar operations.
#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("no access token available for connection")]
    NoAccessToken,

    #[error("calendar connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("{provider} API error ({status}): {message}")]
    ProviderApi { provider: CalendarProvider, status: u16, message: String },

    #[error("CalDAV error ({status}): {message}")]
    CalDav { status: u16, message: String },

    #[error("appointment conflicts with {} existing event(s)", events.len())]
    Conflict { events: Vec<CalendarEvent> },

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CalendarError {
    /// Wire error code exposed to callers.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::NoAccessToken => "NO_ACCESS_TOKEN".to_string(),
            Self::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND".to_string(),
            Self::ProviderApi { provider, status, .. } => {
                format!("{}_API_ERROR_{}", provider.code_prefix(), status)
            }
            Self::CalDav { status, .. } => format!("CALDAV_ERROR_{status}"),
            Self::Conflict { .. } => "APPOINTMENT_CONFLICT".to_string(),
            Self::Auth(_) => "AUTH_ERROR".to_string(),
            Self::Network(_) => "NETWORK_ERROR".to_string(),
            Self::Serialization(_) => "SERIALIZATION_ERROR".to_string(),
            Self::Storage(_) => "STORAGE_ERROR".to_string(),
            Self::InvalidInput(_) => "INVALID_INPUT".to_string(),
            Self::Internal(_) => "INTERNAL_ERROR".to_string(),
        }
    }

    /// Whether retrying the operation may succeed.
    ///
    /// HTTP 401 is retryable because a token refresh may help; 5xx because
    /// the failure is presumed transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderApi { status, .. } | Self::CalDav { status, .. } => {
                *status == 401 || *status >= 500
            }
            Self::Network(_) | Self::Storage(_) | Self::Internal(_) => true,
            Self::NoAccessToken
            | Self::ConnectionNotFound(_)
            | Self::Conflict { .. }
            | Self::Auth(_)
            | Self::Serialization(_)
            | Self::InvalidInput(_) => false,
        }
    }
}

impl From<serde_json::Error> for CalendarError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for calendar operations.
pub type Result<T> = std::result::Result<T, CalendarError>;
