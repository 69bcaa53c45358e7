//! Calendar connection and OAuth token types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Calendar backend a connection is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarProvider {
    Google,
    Outlook,
    Apple,
}

impl CalendarProvider {
    /// Uppercase name used in wire error codes (`GOOGLE_API_ERROR_500`).
    #[must_use]
    pub fn code_prefix(&self) -> &'static str {
        match self {
            Self::Google => "GOOGLE",
            Self::Outlook => "OUTLOOK",
            Self::Apple => "APPLE",
        }
    }
}

impl fmt::Display for CalendarProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Google => write!(f, "google"),
            Self::Outlook => write!(f, "outlook"),
            Self::Apple => write!(f, "apple"),
        }
    }
}

impl FromStr for CalendarProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "outlook" | "microsoft" => Ok(Self::Outlook),
            "apple" | "icloud" => Ok(Self::Apple),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// OAuth 2.0 access and refresh tokens with metadata
///
/// Unified token type across providers:
/// - Optional refresh token (some providers don't issue them)
/// - Absolute `expires_at` timestamp computed from the provider's
///   `expires_in` at issuance time
/// - Scope tracking for granted permissions
///
/// For Apple the "access token" is the app-specific CalDAV password and no
/// expiry is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokens {
    /// Access token for API authentication
    pub access_token: String,

    /// Refresh token for obtaining new access tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Absolute expiration timestamp (UTC)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Token type ("Bearer" for OAuth 2.0 providers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Granted scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
}

impl OAuthTokens {
    /// Create a new token set, computing `expires_at` from a lifetime in
    /// seconds.
    #[must_use]
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: Option<i64>,
        token_type: Option<String>,
        scope: Vec<String>,
    ) -> Self {
        let expires_at = expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        Self { access_token, refresh_token, expires_at, token_type, scope }
    }

    /// Check if the access token is expired or will expire within the given
    /// threshold.
    ///
    /// Returns `false` when no expiry is set (app-specific passwords).
    #[must_use]
    pub fn is_expired(&self, threshold_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                Utc::now() + chrono::Duration::seconds(threshold_seconds) >= expires_at
            }
            None => false,
        }
    }

    /// Seconds until expiry, or `None` when no expiry is set.
    #[must_use]
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        self.expires_at.map(|expires_at| (expires_at - Utc::now()).num_seconds())
    }
}

/// Lifecycle state of a calendar connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Active,
    Expired,
    Revoked,
    Error,
}

/// A registered link between the application and one provider calendar.
///
/// Created on registration, mutated on token refresh, removed on disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarConnection {
    pub id: String,
    pub provider: CalendarProvider,
    pub calendar_id: String,
    pub tokens: OAuthTokens,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Provider-specific extras (e.g. the CalDAV username for Apple).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CalendarConnection {
    /// Look up a string field in the connection metadata.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}
