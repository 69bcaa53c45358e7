//! Calendar provider adapters
//!
//! One adapter per backend, all behind [`CalendarProviderApi`]. The factory
//! wires the adapters a service instance supports.

pub mod apple;
pub mod google;
pub mod outlook;
pub mod traits;

use std::sync::Arc;

use calbridge_domain::{CalendarProvider, Result};

use crate::oauth::OAuthClientConfig;

pub use apple::AppleCalDavProvider;
pub use google::GoogleCalendarProvider;
pub use outlook::OutlookCalendarProvider;
pub use traits::CalendarProviderApi;

/// Build the adapter for one provider.
///
/// `oauth` supplies the client credentials Google and Outlook need for token
/// refresh; Apple ignores it (app-specific passwords never expire).
///
/// # Errors
/// Fails when the adapter's HTTP client cannot be built.
pub fn create_provider(
    provider: CalendarProvider,
    oauth: Option<OAuthClientConfig>,
) -> Result<Arc<dyn CalendarProviderApi>> {
    Ok(match provider {
        CalendarProvider::Google => Arc::new(GoogleCalendarProvider::new(oauth)?),
        CalendarProvider::Outlook => Arc::new(OutlookCalendarProvider::new(oauth)?),
        CalendarProvider::Apple => Arc::new(AppleCalDavProvider::new()?),
    })
}
