//! Provider adapter contract
//!
//! Every backend (Google Calendar REST, Microsoft Graph, Apple CalDAV)
//! implements [`CalendarProviderApi`]. The required methods cover the raw
//! provider I/O; the provided methods implement the scheduling algorithms
//! once, on top of `get_free_busy` and `get_events`, so every backend shares
//! identical slot-generation and conflict semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use calbridge_domain::availability;
use calbridge_domain::{
    AppointmentConflict, AppointmentDetails, AvailabilityQuery, AvailableSlot, CalendarConnection,
    CalendarEvent, CalendarInfo, CalendarProvider, EventStatus, FreeBusyQuery, FreeBusyResponse,
    OAuthTokens, Result, TimeSlot,
};

/// One calendar backend.
///
/// Methods take the connection (for calendar id and metadata) and a decrypted
/// access token; the facade resolves and refreshes tokens before calling in.
#[async_trait]
pub trait CalendarProviderApi: Send + Sync {
    fn provider(&self) -> CalendarProvider;

    /// Obtain a fresh token set from a refresh token.
    async fn refresh_tokens(&self, refresh_token: &str) -> Result<OAuthTokens>;

    /// List the calendars visible to the connected account.
    async fn list_calendars(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
    ) -> Result<Vec<CalendarInfo>>;

    /// Fetch events overlapping `[start, end)`, normalized and expanded from
    /// recurrences where the backend supports expansion.
    async fn get_events(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>>;

    /// Fetch a single event by its provider-native id.
    async fn get_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        event_id: &str,
    ) -> Result<CalendarEvent>;

    /// Create an appointment, returning the normalized created event.
    async fn create_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        details: &AppointmentDetails,
    ) -> Result<CalendarEvent>;

    /// Update an existing appointment in place.
    async fn update_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        event_id: &str,
        details: &AppointmentDetails,
    ) -> Result<CalendarEvent>;

    /// Cancel an appointment by its provider-native id.
    async fn delete_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        event_id: &str,
    ) -> Result<()>;

    /// Busy intervals (and the derived free complement) for the window.
    async fn get_free_busy(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        query: &FreeBusyQuery,
    ) -> Result<FreeBusyResponse>;

    /// Check that the connection's credentials still work.
    ///
    /// Default: a calendar listing succeeds iff the token is valid.
    async fn validate(&self, conn: &CalendarConnection, access_token: &str) -> Result<()> {
        self.list_calendars(conn, access_token).await.map(|_| ())
    }

    /// Generate bookable slots: free/busy lookup plus pure slot math.
    async fn find_available_slots(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        query: &AvailabilityQuery,
    ) -> Result<Vec<AvailableSlot>> {
        let free_busy = FreeBusyQuery {
            start: query.start,
            end: query.end,
            calendar_ids: vec![conn.calendar_id.clone()],
        };
        let response = self.get_free_busy(conn, access_token, &free_busy).await?;
        let slots = availability::generate_slots(query, &response.busy)?;
        debug!(
            provider = %self.provider(),
            busy = response.busy.len(),
            slots = slots.len(),
            "generated availability slots"
        );
        Ok(slots)
    }

    /// Find confirmed or tentative events overlapping `[start, end)`.
    ///
    /// `exclude_event_id` skips the appointment being rescheduled so it never
    /// conflicts with itself. Cancelled events never count.
    async fn check_conflict(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude_event_id: Option<&str>,
    ) -> Result<AppointmentConflict> {
        let window = TimeSlot::new(start, end);
        let events = self.get_events(conn, access_token, start, end).await?;
        let conflicting: Vec<CalendarEvent> = events
            .into_iter()
            .filter(|event| {
                event.status != EventStatus::Cancelled
                    && exclude_event_id != Some(event.provider_event_id.as_str())
                    && window.overlaps(&TimeSlot::new(event.start, event.end))
            })
            .collect();
        Ok(AppointmentConflict::with_events(conflicting))
    }
}

#[cfg(test)]
mod tests {
    //! Tests for the provided trait algorithms against a canned backend.
    use std::sync::Arc;

    use calbridge_domain::{CalendarError, ConnectionStatus};
    use chrono::TimeZone;

    use super::*;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, h, m, 0).unwrap()
    }

    fn event(id: &str, start: DateTime<Utc>, end: DateTime<Utc>, status: EventStatus) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            title: "Checkup".to_string(),
            description: None,
            start,
            end,
            timezone: None,
            location: None,
            status,
            attendees: vec![],
            organizer: None,
            recurrence: None,
            patient: None,
            provider: CalendarProvider::Google,
            provider_event_id: id.to_string(),
        }
    }

    fn connection() -> CalendarConnection {
        CalendarConnection {
            id: "c1".to_string(),
            provider: CalendarProvider::Google,
            calendar_id: "primary".to_string(),
            tokens: OAuthTokens::new("tok".to_string(), None, Some(3600), None, vec![]),
            status: ConnectionStatus::Active,
            timezone: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Backend stub returning canned events and busy intervals.
    struct CannedProvider {
        events: Vec<CalendarEvent>,
        busy: Vec<TimeSlot>,
    }

    #[async_trait]
    impl CalendarProviderApi for CannedProvider {
        fn provider(&self) -> CalendarProvider {
            CalendarProvider::Google
        }

        async fn refresh_tokens(&self, _refresh_token: &str) -> Result<OAuthTokens> {
            Err(CalendarError::Internal("not used".into()))
        }

        async fn list_calendars(
            &self,
            _conn: &CalendarConnection,
            _access_token: &str,
        ) -> Result<Vec<CalendarInfo>> {
            Ok(vec![])
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
            _event_id: &str,
        ) -> Result<CalendarEvent> {
            Err(CalendarError::Internal("not used".into()))
        }

        async fn create_event(
            &self,
            _conn: &CalendarConnection,
            _access_token: &str,
            _details: &AppointmentDetails,
        ) -> Result<CalendarEvent> {
            Err(CalendarError::Internal("not used".into()))
        }

        async fn update_event(
            &self,
            _conn: &CalendarConnection,
            _access_token: &str,
            _event_id: &str,
            _details: &AppointmentDetails,
        ) -> Result<CalendarEvent> {
            Err(CalendarError::Internal("not used".into()))
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
            let window = TimeSlot::new(query.start, query.end);
            Ok(FreeBusyResponse {
                calendar_id: "primary".to_string(),
                busy: self.busy.clone(),
                available: availability::complement(&window, &self.busy),
            })
        }
    }

    #[tokio::test]
    async fn find_available_slots_skips_busy_time() {
        let provider = Arc::new(CannedProvider {
            events: vec![],
            busy: vec![TimeSlot::new(ts(10, 0), ts(11, 0))],
        });
        let query = AvailabilityQuery {
            start: ts(9, 0),
            end: ts(12, 0),
            duration_minutes: 30,
            timezone: None,
            business_hours: None,
            exclude_dates: vec![],
        };
        let slots =
            provider.find_available_slots(&connection(), "tok", &query).await.unwrap();
        assert!(!slots.is_empty());
        assert!(!slots.iter().any(|s| s.start == ts(10, 0)));
        assert!(slots.iter().any(|s| s.start == ts(11, 0)));
    }

    #[tokio::test]
    async fn check_conflict_reports_overlapping_events() {
        let provider = Arc::new(CannedProvider {
            events: vec![event("e1", ts(10, 0), ts(11, 0), EventStatus::Confirmed)],
            busy: vec![],
        });
        let conflict = provider
            .check_conflict(&connection(), "tok", ts(10, 30), ts(11, 30), None)
            .await
            .unwrap();
        assert!(conflict.has_conflict);
        assert_eq!(conflict.conflicting_events.len(), 1);
    }

    #[tokio::test]
    async fn check_conflict_ignores_cancelled_and_excluded_events() {
        let provider = Arc::new(CannedProvider {
            events: vec![
                event("cancelled", ts(10, 0), ts(11, 0), EventStatus::Cancelled),
                event("self", ts(10, 0), ts(11, 0), EventStatus::Confirmed),
            ],
            busy: vec![],
        });
        let conflict = provider
            .check_conflict(&connection(), "tok", ts(10, 0), ts(11, 0), Some("self"))
            .await
            .unwrap();
        assert!(!conflict.has_conflict);
    }

    #[tokio::test]
    async fn adjacent_event_is_not_a_conflict() {
        let provider = Arc::new(CannedProvider {
            events: vec![event("e1", ts(9, 0), ts(10, 0), EventStatus::Confirmed)],
            busy: vec![],
        });
        let conflict = provider
            .check_conflict(&connection(), "tok", ts(10, 0), ts(11, 0), None)
            .await
            .unwrap();
        assert!(!conflict.has_conflict);
    }
}
