//! Calendar service facade
//!
//! The one public surface of the integration layer. Every operation resolves
//! a connection, ensures a live access token (refreshing lazily behind a
//! per-connection lock), routes to the right provider adapter, and wraps the
//! outcome in a [`CalendarOperationResult`] so callers never see a bare
//! `Err` or a panic.
//!
//! Writes are guarded: `create_appointment` and `update_appointment` run a
//! conflict check against the live calendar first and refuse to double-book.
//! Updates that leave the appointment window untouched skip the check.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use calbridge_domain::constants::TOKEN_REFRESH_THRESHOLD_SECONDS;
use calbridge_domain::{
    AppointmentConflict, AppointmentDetails, AvailabilityQuery, AvailableSlot,
    CalendarConnection, CalendarError, CalendarEvent, CalendarInfo, CalendarOperationResult,
    CalendarProvider, ConnectionStatus, FreeBusyQuery, FreeBusyResponse, Result,
};

use crate::oauth::OAuthClientConfig;
use crate::providers::{create_provider, CalendarProviderApi};
use crate::tokens::ConnectionStore;

/// Facade over all registered calendar connections and provider adapters.
pub struct CalendarService {
    connections: RwLock<HashMap<String, CalendarConnection>>,
    providers: HashMap<CalendarProvider, Arc<dyn CalendarProviderApi>>,
    store: ConnectionStore,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CalendarService {
    /// Build the service and hydrate the connection cache from storage.
    ///
    /// # Errors
    /// Fails when the connection store cannot be read or an adapter's HTTP
    /// client cannot be built.
    pub async fn new(
        store: ConnectionStore,
        google: Option<OAuthClientConfig>,
        outlook: Option<OAuthClientConfig>,
    ) -> Result<Self> {
        let mut providers: HashMap<CalendarProvider, Arc<dyn CalendarProviderApi>> =
            HashMap::new();
        providers
            .insert(CalendarProvider::Google, create_provider(CalendarProvider::Google, google)?);
        providers.insert(
            CalendarProvider::Outlook,
            create_provider(CalendarProvider::Outlook, outlook)?,
        );
        providers
            .insert(CalendarProvider::Apple, create_provider(CalendarProvider::Apple, None)?);

        Self::with_providers(store, providers).await
    }

    /// Build the service with explicit provider adapters.
    ///
    /// Used by tests to point adapters at mock servers.
    ///
    /// # Errors
    /// Fails when the connection store cannot be read.
    pub async fn with_providers(
        store: ConnectionStore,
        providers: HashMap<CalendarProvider, Arc<dyn CalendarProviderApi>>,
    ) -> Result<Self> {
        let loaded = store.load_all().await?;
        info!(connections = loaded.len(), "calendar service initialized");
        let connections =
            loaded.into_iter().map(|conn| (conn.id.clone(), conn)).collect::<HashMap<_, _>>();

        Ok(Self {
            connections: RwLock::new(connections),
            providers,
            store,
            refresh_locks: DashMap::new(),
        })
    }

    fn provider_for(&self, provider: CalendarProvider) -> Result<Arc<dyn CalendarProviderApi>> {
        self.providers.get(&provider).cloned().ok_or_else(|| {
            CalendarError::Internal(format!("no adapter registered for provider {provider}"))
        })
    }

    async fn connection(&self, connection_id: &str) -> Result<CalendarConnection> {
        self.connections
            .read()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| CalendarError::ConnectionNotFound(connection_id.to_string()))
    }

    async fn cache_and_persist(&self, conn: &CalendarConnection) -> Result<()> {
        self.store.save(conn).await?;
        self.connections.write().await.insert(conn.id.clone(), conn.clone());
        Ok(())
    }

    fn refresh_lock(&self, connection_id: &str) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry(connection_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Refresh a connection's tokens through its provider.
    ///
    /// Serialized per connection so concurrent operations trigger at most one
    /// refresh; late arrivals re-check the cache after taking the lock.
    async fn refresh_connection(&self, connection_id: &str, force: bool) -> Result<CalendarConnection> {
        let lock = self.refresh_lock(connection_id);
        let _guard = lock.lock().await;

        let conn = self.connection(connection_id).await?;
        if !force && !conn.tokens.is_expired(TOKEN_REFRESH_THRESHOLD_SECONDS) {
            return Ok(conn);
        }

        let refresh_token = conn
            .tokens
            .refresh_token
            .clone()
            .ok_or_else(|| CalendarError::Auth("connection has no refresh token".to_string()))?;

        let provider = self.provider_for(conn.provider)?;
        let mut refreshed = conn.clone();
        match provider.refresh_tokens(&refresh_token).await {
            Ok(mut tokens) => {
                if tokens.refresh_token.is_none() {
                    tokens.refresh_token = Some(refresh_token);
                }
                refreshed.tokens = tokens;
                refreshed.status = ConnectionStatus::Active;
                self.cache_and_persist(&refreshed).await?;
                info!(connection_id, provider = %refreshed.provider, "refreshed access token");
                Ok(refreshed)
            }
            Err(err) => {
                warn!(connection_id, error = %err, "token refresh failed");
                refreshed.status = ConnectionStatus::Expired;
                // Best effort; the refresh failure is the error that matters.
                if let Err(persist_err) = self.cache_and_persist(&refreshed).await {
                    warn!(connection_id, error = %persist_err, "failed to persist expired status");
                }
                Err(err)
            }
        }
    }

    /// Resolve the connection and a live access token, refreshing if the
    /// token is within the expiry buffer.
    async fn authorized(&self, connection_id: &str) -> Result<(CalendarConnection, String)> {
        let conn = self.connection(connection_id).await?;
        if conn.tokens.access_token.is_empty() {
            return Err(CalendarError::NoAccessToken);
        }

        let conn = if conn.tokens.is_expired(TOKEN_REFRESH_THRESHOLD_SECONDS) {
            self.refresh_connection(connection_id, false).await?
        } else {
            conn
        };

        let token = conn.tokens.access_token.clone();
        Ok((conn, token))
    }

    // --- Connection management ---

    /// Register a connection after verifying its credentials work.
    pub async fn register_connection(
        &self,
        conn: CalendarConnection,
    ) -> CalendarOperationResult<CalendarConnection> {
        let outcome = async {
            let provider = self.provider_for(conn.provider)?;
            if conn.tokens.access_token.is_empty() {
                return Err(CalendarError::NoAccessToken);
            }
            provider.validate(&conn, &conn.tokens.access_token).await?;

            let mut registered = conn;
            registered.status = ConnectionStatus::Active;
            self.cache_and_persist(&registered).await?;
            info!(connection_id = %registered.id, provider = %registered.provider, "registered connection");
            Ok(registered)
        }
        .await;
        outcome.into()
    }

    /// Disconnect and forget a connection. Unknown ids are not an error.
    pub async fn remove_connection(&self, connection_id: &str) -> CalendarOperationResult<()> {
        let outcome = async {
            self.store.remove(connection_id).await?;
            self.connections.write().await.remove(connection_id);
            self.refresh_locks.remove(connection_id);
            info!(connection_id, "removed connection");
            Ok(())
        }
        .await;
        outcome.into()
    }

    /// Check whether a connection's credentials still work.
    ///
    /// Returns `Ok(false)` (and marks the connection) when the provider
    /// rejects the credentials; other failures surface as errors.
    pub async fn validate_connection(&self, connection_id: &str) -> CalendarOperationResult<bool> {
        let outcome = async {
            let (conn, token) = self.authorized(connection_id).await?;
            let provider = self.provider_for(conn.provider)?;
            match provider.validate(&conn, &token).await {
                Ok(()) => {
                    if conn.status != ConnectionStatus::Active {
                        let mut active = conn;
                        active.status = ConnectionStatus::Active;
                        self.cache_and_persist(&active).await?;
                    }
                    Ok(true)
                }
                Err(
                    CalendarError::ProviderApi { status: 401 | 403, .. }
                    | CalendarError::CalDav { status: 401 | 403, .. },
                ) => {
                    let mut invalid = conn;
                    invalid.status = ConnectionStatus::Revoked;
                    self.cache_and_persist(&invalid).await?;
                    Ok(false)
                }
                Err(err) => Err(err),
            }
        }
        .await;
        outcome.into()
    }

    /// Force a token refresh regardless of expiry.
    pub async fn refresh_connection_tokens(
        &self,
        connection_id: &str,
    ) -> CalendarOperationResult<CalendarConnection> {
        self.refresh_connection(connection_id, true).await.into()
    }

    /// All connections currently registered, tokens included.
    pub async fn list_connections(&self) -> Vec<CalendarConnection> {
        self.connections.read().await.values().cloned().collect()
    }

    // --- Calendar reads ---

    /// Calendars visible to the connected account.
    pub async fn list_calendars(
        &self,
        connection_id: &str,
    ) -> CalendarOperationResult<Vec<CalendarInfo>> {
        let outcome = async {
            let (conn, token) = self.authorized(connection_id).await?;
            let provider = self.provider_for(conn.provider)?;
            provider.list_calendars(&conn, &token).await
        }
        .await;
        outcome.into()
    }

    /// Normalized events overlapping `[start, end)`.
    pub async fn get_events(
        &self,
        connection_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CalendarOperationResult<Vec<CalendarEvent>> {
        let outcome = async {
            let (conn, token) = self.authorized(connection_id).await?;
            let provider = self.provider_for(conn.provider)?;
            provider.get_events(&conn, &token, start, end).await
        }
        .await;
        outcome.into()
    }

    /// A single appointment by its provider-native id.
    pub async fn get_appointment(
        &self,
        connection_id: &str,
        event_id: &str,
    ) -> CalendarOperationResult<CalendarEvent> {
        let outcome = async {
            let (conn, token) = self.authorized(connection_id).await?;
            let provider = self.provider_for(conn.provider)?;
            provider.get_event(&conn, &token, event_id).await
        }
        .await;
        outcome.into()
    }

    // --- Appointment writes ---

    /// Book an appointment, refusing to double-book.
    ///
    /// The conflict check runs against the live calendar immediately before
    /// the write; a conflict resolves to `APPOINTMENT_CONFLICT` with the
    /// blocking events attached.
    pub async fn create_appointment(
        &self,
        connection_id: &str,
        details: &AppointmentDetails,
    ) -> CalendarOperationResult<CalendarEvent> {
        let outcome = async {
            let (conn, token) = self.authorized(connection_id).await?;
            let provider = self.provider_for(conn.provider)?;

            let conflict = provider
                .check_conflict(&conn, &token, details.start, details.end, None)
                .await?;
            if conflict.has_conflict {
                return Err(CalendarError::Conflict { events: conflict.conflicting_events });
            }

            let event = provider.create_event(&conn, &token, details).await?;
            info!(
                connection_id,
                event_id = %event.provider_event_id,
                provider = %conn.provider,
                "created appointment"
            );
            Ok(event)
        }
        .await;
        outcome.into()
    }

    /// Reschedule or edit an appointment, refusing to double-book.
    ///
    /// The conflict check only runs when the update moves the appointment
    /// window; editing other fields in place must not fail on pre-existing
    /// overlaps. The appointment being updated is excluded from the check so
    /// it never collides with itself.
    pub async fn update_appointment(
        &self,
        connection_id: &str,
        event_id: &str,
        details: &AppointmentDetails,
    ) -> CalendarOperationResult<CalendarEvent> {
        let outcome = async {
            let (conn, token) = self.authorized(connection_id).await?;
            let provider = self.provider_for(conn.provider)?;

            let existing = provider.get_event(&conn, &token, event_id).await?;
            if details.start != existing.start || details.end != existing.end {
                let conflict = provider
                    .check_conflict(&conn, &token, details.start, details.end, Some(event_id))
                    .await?;
                if conflict.has_conflict {
                    return Err(CalendarError::Conflict { events: conflict.conflicting_events });
                }
            }

            let event = provider.update_event(&conn, &token, event_id, details).await?;
            info!(connection_id, event_id, provider = %conn.provider, "updated appointment");
            Ok(event)
        }
        .await;
        outcome.into()
    }

    /// Cancel an appointment.
    pub async fn cancel_appointment(
        &self,
        connection_id: &str,
        event_id: &str,
    ) -> CalendarOperationResult<()> {
        let outcome = async {
            let (conn, token) = self.authorized(connection_id).await?;
            let provider = self.provider_for(conn.provider)?;
            provider.delete_event(&conn, &token, event_id).await?;
            info!(connection_id, event_id, provider = %conn.provider, "cancelled appointment");
            Ok(())
        }
        .await;
        outcome.into()
    }

    // --- Scheduling ---

    /// Bookable slots in the query window.
    pub async fn find_available_slots(
        &self,
        connection_id: &str,
        query: &AvailabilityQuery,
    ) -> CalendarOperationResult<Vec<AvailableSlot>> {
        let outcome = async {
            let (conn, token) = self.authorized(connection_id).await?;
            let provider = self.provider_for(conn.provider)?;
            provider.find_available_slots(&conn, &token, query).await
        }
        .await;
        outcome.into()
    }

    /// Events that would collide with `[start, end)`.
    pub async fn check_conflict(
        &self,
        connection_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_event_id: Option<&str>,
    ) -> CalendarOperationResult<AppointmentConflict> {
        let outcome = async {
            let (conn, token) = self.authorized(connection_id).await?;
            let provider = self.provider_for(conn.provider)?;
            provider.check_conflict(&conn, &token, start, end, exclude_event_id).await
        }
        .await;
        outcome.into()
    }

    /// Busy intervals and their free complement for the window.
    pub async fn get_free_busy(
        &self,
        connection_id: &str,
        query: &FreeBusyQuery,
    ) -> CalendarOperationResult<FreeBusyResponse> {
        let outcome = async {
            let (conn, token) = self.authorized(connection_id).await?;
            let provider = self.provider_for(conn.provider)?;
            provider.get_free_busy(&conn, &token, query).await
        }
        .await;
        outcome.into()
    }
}

#[cfg(test)]
mod tests {
    //! Facade tests against an in-memory provider stub; real HTTP traffic is
    //! covered by the mock-server integration tests.
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use calbridge_common::{AesGcmTokenCipher, MemoryKeyValueStore};
    use calbridge_domain::availability::complement;
    use calbridge_domain::{Attendee, EventStatus, OAuthTokens, TimeSlot};
    use chrono::TimeZone;

    use super::*;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
    }

    fn event(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            title: "Existing".to_string(),
            description: None,
            start,
            end,
            timezone: None,
            location: None,
            status: EventStatus::Confirmed,
            attendees: vec![],
            organizer: None,
            recurrence: None,
            patient: None,
            provider: CalendarProvider::Google,
            provider_event_id: id.to_string(),
        }
    }

    fn details(start: DateTime<Utc>, end: DateTime<Utc>) -> AppointmentDetails {
        AppointmentDetails {
            title: "New appointment".to_string(),
            description: None,
            start,
            end,
            timezone: None,
            location: None,
            attendees: vec![Attendee::new("jane@example.com")],
            patient: None,
            reminder_minutes: None,
        }
    }

    fn connection(id: &str, expires_in: Option<i64>) -> CalendarConnection {
        CalendarConnection {
            id: id.to_string(),
            provider: CalendarProvider::Google,
            calendar_id: "primary".to_string(),
            tokens: OAuthTokens::new(
                "live-token".to_string(),
                Some("refresh-token".to_string()),
                expires_in,
                Some("Bearer".to_string()),
                vec![],
            ),
            status: ConnectionStatus::Active,
            timezone: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[derive(Default)]
    struct StubProvider {
        events: Vec<CalendarEvent>,
        fail_validate: bool,
        refresh_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CalendarProviderApi for StubProvider {
        fn provider(&self) -> CalendarProvider {
            CalendarProvider::Google
        }

        async fn refresh_tokens(&self, refresh_token: &str) -> Result<OAuthTokens> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(OAuthTokens::new(
                "refreshed-token".to_string(),
                Some(refresh_token.to_string()),
                Some(3600),
                Some("Bearer".to_string()),
                vec![],
            ))
        }

        async fn list_calendars(
            &self,
            _conn: &CalendarConnection,
            _access_token: &str,
        ) -> Result<Vec<CalendarInfo>> {
            if self.fail_validate {
                return Err(CalendarError::ProviderApi {
                    provider: CalendarProvider::Google,
                    status: 401,
                    message: "invalid credentials".to_string(),
                });
            }
            Ok(vec![CalendarInfo {
                id: "primary".to_string(),
                name: "Primary".to_string(),
                description: None,
                timezone: Some("UTC".to_string()),
                primary: true,
            }])
        }

        async fn get_events(
            &self,
            _conn: &CalendarConnection,
            _access_token: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<CalendarEvent>> {
            Ok(self.events.clone())
        }

        async fn get_event(
            &self,
            _conn: &CalendarConnection,
            _access_token: &str,
            event_id: &str,
        ) -> Result<CalendarEvent> {
            self.events
                .iter()
                .find(|e| e.provider_event_id == event_id)
                .cloned()
                .ok_or_else(|| CalendarError::ProviderApi {
                    provider: CalendarProvider::Google,
                    status: 404,
                    message: "not found".to_string(),
                })
        }

        async fn create_event(
            &self,
            _conn: &CalendarConnection,
            _access_token: &str,
            details: &AppointmentDetails,
        ) -> Result<CalendarEvent> {
            let mut created = event("created-1", details.start, details.end);
            created.title = details.title.clone();
            Ok(created)
        }

        async fn update_event(
            &self,
            _conn: &CalendarConnection,
            _access_token: &str,
            event_id: &str,
            details: &AppointmentDetails,
        ) -> Result<CalendarEvent> {
            Ok(event(event_id, details.start, details.end))
        }

        async fn delete_event(
            &self,
            _conn: &CalendarConnection,
            _access_token: &str,
            _event_id: &str,
        ) -> Result<()> {
            Ok(())
        }

        async fn get_free_busy(
            &self,
            _conn: &CalendarConnection,
            _access_token: &str,
            query: &FreeBusyQuery,
        ) -> Result<FreeBusyResponse> {
            let busy: Vec<TimeSlot> =
                self.events.iter().map(|e| TimeSlot::new(e.start, e.end)).collect();
            let window = TimeSlot::new(query.start, query.end);
            Ok(FreeBusyResponse {
                calendar_id: "primary".to_string(),
                available: complement(&window, &busy),
                busy,
            })
        }
    }

    async fn service_with(stub: StubProvider) -> CalendarService {
        let store = ConnectionStore::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(AesGcmTokenCipher::new(&AesGcmTokenCipher::generate_key()).unwrap()),
        );
        let mut providers: HashMap<CalendarProvider, Arc<dyn CalendarProviderApi>> =
            HashMap::new();
        providers.insert(CalendarProvider::Google, Arc::new(stub));
        CalendarService::with_providers(store, providers).await.unwrap()
    }

    #[tokio::test]
    async fn register_then_list_calendars() {
        let service = service_with(StubProvider::default()).await;
        let result = service.register_connection(connection("c1", Some(3600))).await;
        assert!(result.success);

        let calendars = service.list_calendars("c1").await;
        assert!(calendars.success);
        assert_eq!(calendars.data.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_rejects_bad_credentials() {
        let service =
            service_with(StubProvider { fail_validate: true, ..Default::default() }).await;
        let result = service.register_connection(connection("c1", Some(3600))).await;
        assert!(!result.success);
        assert_eq!(result.error_code(), Some("GOOGLE_API_ERROR_401"));
        assert!(result.error.unwrap().retryable);
    }

    #[tokio::test]
    async fn unknown_connection_is_reported() {
        let service = service_with(StubProvider::default()).await;
        let result = service.list_calendars("ghost").await;
        assert_eq!(result.error_code(), Some("CONNECTION_NOT_FOUND"));
    }

    #[tokio::test]
    async fn empty_access_token_is_reported() {
        let service = service_with(StubProvider::default()).await;
        let mut conn = connection("c1", Some(3600));
        conn.tokens.access_token = String::new();
        // Bypass registration validation; seed the cache directly.
        service.cache_and_persist(&conn).await.unwrap();

        let result = service.list_calendars("c1").await;
        assert_eq!(result.error_code(), Some("NO_ACCESS_TOKEN"));
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_before_the_call() {
        let service = service_with(StubProvider::default()).await;
        // Expires within the 300s buffer, so any operation must refresh.
        service.cache_and_persist(&connection("c1", Some(60))).await.unwrap();

        let result = service.list_calendars("c1").await;
        assert!(result.success);

        let refreshed = service.connection("c1").await.unwrap();
        assert_eq!(refreshed.tokens.access_token, "refreshed-token");
        assert_eq!(refreshed.tokens.refresh_token.as_deref(), Some("refresh-token"));
        assert!(!refreshed.tokens.is_expired(TOKEN_REFRESH_THRESHOLD_SECONDS));
    }

    #[tokio::test]
    async fn concurrent_calls_share_a_single_refresh() {
        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let stub = StubProvider { refresh_calls: refresh_calls.clone(), ..Default::default() };
        let service = Arc::new(service_with(stub).await);
        // Expires within the buffer, so every caller detects a stale token.
        service.cache_and_persist(&connection("c1", Some(60))).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.list_calendars("c1").await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().success);
        }

        // The winner refreshes; everyone else re-reads the fresh tokens.
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forced_refresh_updates_a_valid_token() {
        let service = service_with(StubProvider::default()).await;
        service.cache_and_persist(&connection("c1", Some(3600))).await.unwrap();

        let result = service.refresh_connection_tokens("c1").await;
        assert!(result.success);
        assert_eq!(result.data.unwrap().tokens.access_token, "refreshed-token");
    }

    #[tokio::test]
    async fn create_appointment_refuses_to_double_book() {
        let service = service_with(StubProvider {
            events: vec![event("busy-1", ts(10, 0), ts(11, 0))],
            ..Default::default()
        })
        .await;
        service.cache_and_persist(&connection("c1", Some(3600))).await.unwrap();

        let result = service.create_appointment("c1", &details(ts(10, 30), ts(11, 30))).await;
        assert_eq!(result.error_code(), Some("APPOINTMENT_CONFLICT"));
        assert!(!result.error.unwrap().retryable);

        // A non-overlapping window books fine.
        let result = service.create_appointment("c1", &details(ts(11, 0), ts(12, 0))).await;
        assert!(result.success);
        assert_eq!(result.data.unwrap().title, "New appointment");
    }

    #[tokio::test]
    async fn update_appointment_ignores_its_own_slot() {
        let service = service_with(StubProvider {
            events: vec![event("appt-1", ts(10, 0), ts(11, 0))],
            ..Default::default()
        })
        .await;
        service.cache_and_persist(&connection("c1", Some(3600))).await.unwrap();

        // Shifting appt-1 within its own occupied window must not conflict.
        let result =
            service.update_appointment("c1", "appt-1", &details(ts(10, 15), ts(11, 15))).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn unmoved_update_skips_the_conflict_check() {
        let service = service_with(StubProvider {
            events: vec![
                event("appt-1", ts(10, 0), ts(11, 0)),
                event("other", ts(10, 30), ts(11, 30)),
            ],
            ..Default::default()
        })
        .await;
        service.cache_and_persist(&connection("c1", Some(3600))).await.unwrap();

        // A field-only edit keeps the window of an appointment that already
        // overlaps another event; it must not be rejected.
        let result =
            service.update_appointment("c1", "appt-1", &details(ts(10, 0), ts(11, 0))).await;
        assert!(result.success);

        // Moving it into the occupied window is still a conflict.
        let result =
            service.update_appointment("c1", "appt-1", &details(ts(10, 45), ts(11, 45))).await;
        assert_eq!(result.error_code(), Some("APPOINTMENT_CONFLICT"));
    }

    #[tokio::test]
    async fn remove_connection_forgets_it() {
        let service = service_with(StubProvider::default()).await;
        service.cache_and_persist(&connection("c1", Some(3600))).await.unwrap();

        assert!(service.remove_connection("c1").await.success);
        let result = service.list_calendars("c1").await;
        assert_eq!(result.error_code(), Some("CONNECTION_NOT_FOUND"));

        // Removing again is still a success.
        assert!(service.remove_connection("c1").await.success);
    }

    #[tokio::test]
    async fn validate_connection_marks_revoked_credentials() {
        let service =
            service_with(StubProvider { fail_validate: true, ..Default::default() }).await;
        service.cache_and_persist(&connection("c1", Some(3600))).await.unwrap();

        let result = service.validate_connection("c1").await;
        assert!(result.success);
        assert_eq!(result.data, Some(false));
        let conn = service.connection("c1").await.unwrap();
        assert_eq!(conn.status, ConnectionStatus::Revoked);
    }

    #[tokio::test]
    async fn find_available_slots_routes_through_free_busy() {
        let service = service_with(StubProvider {
            events: vec![event("busy-1", ts(10, 0), ts(11, 0))],
            ..Default::default()
        })
        .await;
        service.cache_and_persist(&connection("c1", Some(3600))).await.unwrap();

        let query = AvailabilityQuery {
            start: ts(9, 0),
            end: ts(12, 0),
            duration_minutes: 30,
            timezone: None,
            business_hours: None,
            exclude_dates: vec![],
        };
        let result = service.find_available_slots("c1", &query).await;
        assert!(result.success);
        let slots = result.data.unwrap();
        assert!(!slots.is_empty());
        assert!(!slots.iter().any(|s| s.start == ts(10, 0)));
    }

    #[tokio::test]
    async fn get_free_busy_partitions_the_window() {
        let service = service_with(StubProvider {
            events: vec![event("busy-1", ts(10, 0), ts(11, 0))],
            ..Default::default()
        })
        .await;
        service.cache_and_persist(&connection("c1", Some(3600))).await.unwrap();

        let query =
            FreeBusyQuery { start: ts(9, 0), end: ts(12, 0), calendar_ids: vec![] };
        let result = service.get_free_busy("c1", &query).await;
        let data = result.data.unwrap();
        assert_eq!(data.busy, vec![TimeSlot::new(ts(10, 0), ts(11, 0))]);
        assert_eq!(
            data.available,
            vec![TimeSlot::new(ts(9, 0), ts(10, 0)), TimeSlot::new(ts(11, 0), ts(12, 0))]
        );
    }
}
