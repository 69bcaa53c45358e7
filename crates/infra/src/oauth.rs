//! OAuth2 token lifecycle for calendar providers
//!
//! Authorization-URL construction, one-time code exchange, and access-token
//! refresh for Google and Outlook. Apple iCloud does not speak OAuth: CalDAV
//! authenticates with an app-specific password, so every OAuth operation for
//! Apple fails fast without a network call.
//!
//! Token state machine per connection:
//! `unauthorized → authorized → (refreshing) → authorized → revoked`.

use calbridge_domain::{CalendarError, CalendarProvider, OAuthTokens, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const OUTLOOK_AUTH_URL: &str =
    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
pub const OUTLOOK_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Client credentials and redirect settings for one OAuth provider.
#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl OAuthClientConfig {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
        }
    }
}

/// Wire shape of the Google/Microsoft token endpoints.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
}

impl TokenResponse {
    fn into_tokens(self) -> OAuthTokens {
        let scope = self
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        OAuthTokens::new(
            self.access_token,
            self.refresh_token,
            self.expires_in,
            self.token_type,
            scope,
        )
    }
}

/// Execute a form-encoded token request and parse the standard response.
///
/// Shared by the handler and the Google/Outlook provider adapters.
pub(crate) async fn request_tokens(
    client: &Client,
    token_url: &str,
    params: &[(&str, &str)],
) -> Result<OAuthTokens> {
    let response = client
        .post(token_url)
        .form(params)
        .send()
        .await
        .map_err(|e| CalendarError::Network(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
        return Err(CalendarError::Auth(format!("token endpoint returned {status}: {body}")));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| CalendarError::Serialization(format!("failed to parse token response: {e}")))?;

    Ok(parsed.into_tokens())
}

fn apple_unsupported() -> CalendarError {
    CalendarError::Auth(
        "Apple calendars do not support OAuth; configure an app-specific password for CalDAV"
            .to_string(),
    )
}

/// Per-provider OAuth orchestration.
///
/// Holds the client credentials for the providers the deployment enables and
/// the provider endpoints (overridable for tests).
#[derive(Debug, Clone)]
pub struct OAuthHandler {
    client: Client,
    google: Option<OAuthClientConfig>,
    outlook: Option<OAuthClientConfig>,
    google_token_url: String,
    outlook_token_url: String,
}

impl OAuthHandler {
    /// # Errors
    /// Fails when the HTTP client cannot be built.
    pub fn new(
        google: Option<OAuthClientConfig>,
        outlook: Option<OAuthClientConfig>,
    ) -> Result<Self> {
        Ok(Self {
            client: crate::http_client()?,
            google,
            outlook,
            google_token_url: GOOGLE_TOKEN_URL.to_string(),
            outlook_token_url: OUTLOOK_TOKEN_URL.to_string(),
        })
    }

    /// Override the token endpoints (used by tests against a mock server).
    #[must_use]
    pub fn with_token_endpoints(
        mut self,
        google_token_url: impl Into<String>,
        outlook_token_url: impl Into<String>,
    ) -> Self {
        self.google_token_url = google_token_url.into();
        self.outlook_token_url = outlook_token_url.into();
        self
    }

    fn config_for(&self, provider: CalendarProvider) -> Result<&OAuthClientConfig> {
        let config = match provider {
            CalendarProvider::Google => self.google.as_ref(),
            CalendarProvider::Outlook => self.outlook.as_ref(),
            CalendarProvider::Apple => return Err(apple_unsupported()),
        };
        config.ok_or_else(|| {
            CalendarError::InvalidInput(format!("no OAuth config registered for {provider}"))
        })
    }

    fn token_url_for(&self, provider: CalendarProvider) -> &str {
        match provider {
            CalendarProvider::Outlook => &self.outlook_token_url,
            _ => &self.google_token_url,
        }
    }

    /// Build the provider's authorization URL for the consent redirect.
    ///
    /// Google gets `access_type=offline` and `prompt=consent` to force
    /// refresh-token issuance; Outlook uses `response_mode=query`.
    ///
    /// # Errors
    /// Fails for Apple (no OAuth) and for providers without a registered
    /// config.
    pub fn generate_auth_url(&self, provider: CalendarProvider, state: &str) -> Result<String> {
        let config = self.config_for(provider)?;
        let base = match provider {
            CalendarProvider::Google => GOOGLE_AUTH_URL,
            CalendarProvider::Outlook => OUTLOOK_AUTH_URL,
            CalendarProvider::Apple => return Err(apple_unsupported()),
        };

        let mut url = Url::parse(base)
            .map_err(|e| CalendarError::Internal(format!("invalid authorization URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &config.client_id)
                .append_pair("redirect_uri", &config.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", &config.scopes.join(" "))
                .append_pair("state", state);

            match provider {
                CalendarProvider::Google => {
                    query.append_pair("access_type", "offline").append_pair("prompt", "consent");
                }
                CalendarProvider::Outlook => {
                    query.append_pair("response_mode", "query");
                }
                CalendarProvider::Apple => {}
            }
        }

        Ok(url.into())
    }

    /// Exchange a one-time authorization code for tokens.
    ///
    /// # Errors
    /// Fails fast for Apple; otherwise surfaces token-endpoint failures as
    /// `Auth`/`Network` errors.
    pub async fn exchange_code(
        &self,
        provider: CalendarProvider,
        code: &str,
    ) -> Result<OAuthTokens> {
        let config = self.config_for(provider)?;
        debug!(%provider, "exchanging authorization code for tokens");

        let mut params = vec![
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", config.redirect_uri.as_str()),
        ];
        let scope = config.scopes.join(" ");
        if provider == CalendarProvider::Outlook {
            params.push(("scope", scope.as_str()));
        }

        request_tokens(&self.client, self.token_url_for(provider), &params).await
    }

    /// Refresh an access token.
    ///
    /// When the provider omits a new refresh token (Google and Outlook both
    /// do on refresh), the old one is retained in the returned token set.
    ///
    /// # Errors
    /// Fails fast for Apple; otherwise surfaces token-endpoint failures.
    pub async fn refresh_access_token(
        &self,
        provider: CalendarProvider,
        refresh_token: &str,
    ) -> Result<OAuthTokens> {
        let config = self.config_for(provider)?;
        debug!(%provider, "refreshing access token");

        let mut params = vec![
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let scope = config.scopes.join(" ");
        if provider == CalendarProvider::Outlook {
            params.push(("scope", scope.as_str()));
        }

        let mut tokens =
            request_tokens(&self.client, self.token_url_for(provider), &params).await?;
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }
}
