//! # Calbridge Infra
//!
//! Infrastructure layer of the calendar integration: provider adapters
//! (Google Calendar REST, Microsoft Graph, Apple iCloud CalDAV), the OAuth
//! token lifecycle, encrypted connection persistence, and the
//! [`CalendarService`](service::CalendarService) facade that routes every
//! public operation to the right provider.
//!
//! The facade is the only public surface the rest of the system consumes;
//! every operation resolves to a `CalendarOperationResult` and never panics
//! or leaks a raw error across the boundary.

pub mod oauth;
pub mod providers;
pub mod service;
pub mod tokens;

pub use oauth::{OAuthClientConfig, OAuthHandler};
pub use service::CalendarService;
pub use tokens::ConnectionStore;

/// Provider APIs are expected to answer well within this bound.
const HTTP_TIMEOUT_SECONDS: u64 = 30;

/// Shared reqwest client settings for every provider adapter.
///
/// # Errors
/// Fails when the TLS backend cannot be initialized.
pub(crate) fn http_client() -> calbridge_domain::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECONDS))
        .build()
        .map_err(|e| {
            calbridge_domain::CalendarError::Internal(format!("failed to build HTTP client: {e}"))
        })
}
