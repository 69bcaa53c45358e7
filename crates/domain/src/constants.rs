//! Domain-wide constants

/// Seconds before expiry at which an access token is treated as expired.
pub const TOKEN_REFRESH_THRESHOLD_SECONDS: i64 = 300;

/// Fixed step, in minutes, used when walking an availability window.
///
/// Independent of the requested slot duration: a 90-minute meeting is still
/// probed every 15 minutes, producing overlapping candidate slots.
pub const SLOT_STEP_MINUTES: i64 = 15;

/// Granularity of the Outlook `availabilityView` string.
pub const AVAILABILITY_VIEW_INTERVAL_MINUTES: i64 = 15;

/// Key under which the connection list is persisted.
pub const CONNECTIONS_STORE_KEY: &str = "calendar_connections";
