//! Google Calendar provider
//!
//! Adapter over the Google Calendar v3 REST API. Recurring events are fetched
//! pre-expanded (`singleEvents=true`); the appointment payload rides in
//! `extendedProperties.private.patient` as a JSON string so it round-trips
//! through Google untouched.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use calbridge_domain::availability::{complement, to_rfc3339_utc};
use calbridge_domain::{
    AppointmentDetails, Attendee, CalendarConnection, CalendarError, CalendarEvent, CalendarInfo,
    CalendarProvider, EventStatus, FreeBusyQuery, FreeBusyResponse, OAuthTokens, Result, TimeSlot,
};

use crate::oauth::{request_tokens, OAuthClientConfig, GOOGLE_TOKEN_URL};
use crate::providers::traits::CalendarProviderApi;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";
const PATIENT_PROPERTY: &str = "patient";
const MAX_RESULTS: u32 = 2500;

/// Google Calendar API adapter.
pub struct GoogleCalendarProvider {
    client: Client,
    base_url: String,
    token_url: String,
    oauth: Option<OAuthClientConfig>,
}

impl GoogleCalendarProvider {
    /// # Errors
    /// Fails when the HTTP client cannot be built.
    pub fn new(oauth: Option<OAuthClientConfig>) -> Result<Self> {
        Ok(Self {
            client: crate::http_client()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            oauth,
        })
    }

    /// Point the adapter at a different API root (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Point token refresh at a different endpoint (tests).
    #[must_use]
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.base_url, urlencoding::encode(calendar_id))
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!("{}/{}", self.events_url(calendar_id), urlencoding::encode(event_id))
    }

    async fn check_response(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
        Err(CalendarError::ProviderApi {
            provider: CalendarProvider::Google,
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        let response = self.check_response(response).await?;
        response.json().await.map_err(|e| CalendarError::Serialization(e.to_string()))
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct CalendarList {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListEntry {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    time_zone: Option<String>,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<GoogleEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<DateTime<Utc>>,
    /// All-day events carry a date without a time.
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

impl EventTime {
    fn resolve(&self) -> Option<DateTime<Utc>> {
        self.date_time.or_else(|| {
            self.date.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|naive| naive.and_utc())
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleAttendee {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ExtendedProperties {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    private: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    #[serde(default, skip_serializing)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default)]
    status: Option<String>,
    start: EventTime,
    end: EventTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attendees: Vec<GoogleAttendee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organizer: Option<GoogleAttendee>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    recurrence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extended_properties: Option<ExtendedProperties>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reminders: Option<Reminders>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Reminders {
    use_default: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    overrides: Vec<ReminderOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReminderOverride {
    method: String,
    minutes: i64,
}

#[derive(Debug, Deserialize)]
struct FreeBusyReply {
    #[serde(default)]
    calendars: HashMap<String, FreeBusyCalendar>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<FreeBusyPeriod>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyPeriod {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

// --- Conversions ---

fn parse_status(status: Option<&str>) -> EventStatus {
    match status {
        Some("cancelled") => EventStatus::Cancelled,
        Some("tentative") => EventStatus::Tentative,
        _ => EventStatus::Confirmed,
    }
}

fn into_event(raw: GoogleEvent) -> Result<CalendarEvent> {
    let start = raw.start.resolve().ok_or_else(|| {
        CalendarError::Serialization(format!("event {} has no start time", raw.id))
    })?;
    let end = raw.end.resolve().ok_or_else(|| {
        CalendarError::Serialization(format!("event {} has no end time", raw.id))
    })?;

    let patient = raw
        .extended_properties
        .as_ref()
        .and_then(|props| props.private.get(PATIENT_PROPERTY))
        .and_then(|json| serde_json::from_str(json).ok());

    Ok(CalendarEvent {
        id: raw.id.clone(),
        title: raw.summary.unwrap_or_default(),
        description: raw.description,
        start,
        end,
        timezone: raw.start.time_zone,
        location: raw.location,
        status: parse_status(raw.status.as_deref()),
        attendees: raw
            .attendees
            .into_iter()
            .map(|a| Attendee { email: a.email, name: a.display_name })
            .collect(),
        organizer: raw.organizer.map(|o| Attendee { email: o.email, name: o.display_name }),
        recurrence: raw.recurrence.into_iter().next(),
        patient,
        provider: CalendarProvider::Google,
        provider_event_id: raw.id,
    })
}

fn into_wire(details: &AppointmentDetails) -> Result<GoogleEvent> {
    let extended_properties = match &details.patient {
        Some(patient) => {
            let mut private = HashMap::new();
            private.insert(PATIENT_PROPERTY.to_string(), serde_json::to_string(patient)?);
            Some(ExtendedProperties { private })
        }
        None => None,
    };

    let reminders = details.reminder_minutes.map(|minutes| Reminders {
        use_default: false,
        overrides: vec![ReminderOverride { method: "popup".to_string(), minutes }],
    });

    Ok(GoogleEvent {
        id: String::new(),
        summary: Some(details.title.clone()),
        description: details.description.clone(),
        location: details.location.clone(),
        status: None,
        start: EventTime {
            date_time: Some(details.start),
            date: None,
            time_zone: details.timezone.clone(),
        },
        end: EventTime {
            date_time: Some(details.end),
            date: None,
            time_zone: details.timezone.clone(),
        },
        attendees: details
            .attendees
            .iter()
            .map(|a| GoogleAttendee { email: a.email.clone(), display_name: a.name.clone() })
            .collect(),
        organizer: None,
        recurrence: vec![],
        extended_properties,
        reminders,
    })
}

#[async_trait]
impl CalendarProviderApi for GoogleCalendarProvider {
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::Google
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<OAuthTokens> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            CalendarError::Auth("no Google OAuth client configured".to_string())
        })?;
        let params = [
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let mut tokens = request_tokens(&self.client, &self.token_url, &params).await?;
        // Google omits the refresh token on refresh; keep the one we have.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }

    async fn list_calendars(
        &self,
        _conn: &CalendarConnection,
        access_token: &str,
    ) -> Result<Vec<CalendarInfo>> {
        let url = format!("{}/users/me/calendarList", self.base_url);
        let list: CalendarList = self.get_json(access_token, &url, &[]).await?;
        Ok(list
            .items
            .into_iter()
            .map(|entry| CalendarInfo {
                name: entry.summary.unwrap_or_else(|| entry.id.clone()),
                id: entry.id,
                description: entry.description,
                timezone: entry.time_zone,
                primary: entry.primary,
            })
            .collect())
    }

    async fn get_events(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let query = [
            ("timeMin", to_rfc3339_utc(start)),
            ("timeMax", to_rfc3339_utc(end)),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("maxResults", MAX_RESULTS.to_string()),
        ];
        let list: EventList =
            self.get_json(access_token, &self.events_url(&conn.calendar_id), &query).await?;
        debug!(count = list.items.len(), calendar = %conn.calendar_id, "fetched google events");
        list.items.into_iter().map(into_event).collect()
    }

    async fn get_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        event_id: &str,
    ) -> Result<CalendarEvent> {
        let url = self.event_url(&conn.calendar_id, event_id);
        let raw: GoogleEvent = self.get_json(access_token, &url, &[]).await?;
        into_event(raw)
    }

    async fn create_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        details: &AppointmentDetails,
    ) -> Result<CalendarEvent> {
        let body = into_wire(details)?;
        let response = self
            .client
            .post(self.events_url(&conn.calendar_id))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        let response = self.check_response(response).await?;
        let raw: GoogleEvent =
            response.json().await.map_err(|e| CalendarError::Serialization(e.to_string()))?;
        into_event(raw)
    }

    async fn update_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        event_id: &str,
        details: &AppointmentDetails,
    ) -> Result<CalendarEvent> {
        let body = into_wire(details)?;
        let response = self
            .client
            .put(self.event_url(&conn.calendar_id, event_id))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        let response = self.check_response(response).await?;
        let raw: GoogleEvent =
            response.json().await.map_err(|e| CalendarError::Serialization(e.to_string()))?;
        into_event(raw)
    }

    async fn delete_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        event_id: &str,
    ) -> Result<()> {
        let response = self
            .client
            .delete(self.event_url(&conn.calendar_id, event_id))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        self.check_response(response).await?;
        Ok(())
    }

    async fn get_free_busy(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        query: &FreeBusyQuery,
    ) -> Result<FreeBusyResponse> {
        let calendar_id = query
            .calendar_ids
            .first()
            .cloned()
            .unwrap_or_else(|| conn.calendar_id.clone());
        let body = serde_json::json!({
            "timeMin": to_rfc3339_utc(query.start),
            "timeMax": to_rfc3339_utc(query.end),
            "items": [{"id": calendar_id}],
        });

        let response = self
            .client
            .post(format!("{}/freeBusy", self.base_url))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        let response = self.check_response(response).await?;
        let reply: FreeBusyReply =
            response.json().await.map_err(|e| CalendarError::Serialization(e.to_string()))?;

        // Google may echo the key in normalized form (email casing); with a
        // single requested id the lone entry is ours.
        let busy: Vec<TimeSlot> = reply
            .calendars
            .get(&calendar_id)
            .or_else(|| reply.calendars.values().next())
            .map(|cal| cal.busy.iter().map(|p| TimeSlot::new(p.start, p.end)).collect())
            .unwrap_or_default();
        let window = TimeSlot::new(query.start, query.end);
        let available = complement(&window, &busy);

        Ok(FreeBusyResponse { calendar_id, busy, available })
    }
}
