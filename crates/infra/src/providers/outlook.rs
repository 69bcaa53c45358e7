//! Outlook calendar provider
//!
//! Adapter over the Microsoft Graph calendar API. Recurring events come
//! pre-expanded through `calendarView`; the appointment payload lives in a
//! single-value extended property. Free/busy uses `getSchedule`, whose
//! `availabilityView` string encodes one character per 15-minute interval
//! from the query start (`'0'` means free).

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use calbridge_domain::availability::{local_to_utc, resolve_timezone, to_rfc3339_utc};
use calbridge_domain::constants::AVAILABILITY_VIEW_INTERVAL_MINUTES;
use calbridge_domain::{
    AppointmentDetails, Attendee, CalendarConnection, CalendarError, CalendarEvent, CalendarInfo,
    CalendarProvider, EventStatus, FreeBusyQuery, FreeBusyResponse, OAuthTokens, Result, TimeSlot,
};

use crate::oauth::{request_tokens, OAuthClientConfig, OUTLOOK_TOKEN_URL};
use crate::providers::traits::CalendarProviderApi;

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
/// MAPI property the appointment payload is stored under.
const PATIENT_PROPERTY_ID: &str = "String {66f5a359-4659-4830-9070-00047ec6ac6e} Name Patient";
const PAGE_SIZE: u32 = 500;

/// Microsoft Graph calendar adapter.
pub struct OutlookCalendarProvider {
    client: Client,
    base_url: String,
    token_url: String,
    oauth: Option<OAuthClientConfig>,
}

impl OutlookCalendarProvider {
    /// # Errors
    /// Fails when the HTTP client cannot be built.
    pub fn new(oauth: Option<OAuthClientConfig>) -> Result<Self> {
        Ok(Self {
            client: crate::http_client()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            token_url: OUTLOOK_TOKEN_URL.to_string(),
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
        format!("{}/me/calendars/{}/events", self.base_url, urlencoding::encode(calendar_id))
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!("{}/{}", self.events_url(calendar_id), urlencoding::encode(event_id))
    }

    fn expand_clause() -> String {
        format!("singleValueExtendedProperties($filter=id eq '{PATIENT_PROPERTY_ID}')")
    }

    async fn check_response(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
        Err(CalendarError::ProviderApi {
            provider: CalendarProvider::Outlook,
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
            .header("Prefer", "outlook.timezone=\"UTC\"")
            .query(query)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        let response = self.check_response(response).await?;
        response.json().await.map_err(|e| CalendarError::Serialization(e.to_string()))
    }
}

/// Decode an `availabilityView` string into busy and free intervals.
///
/// One character per interval starting at `start`; `'0'` is free, anything
/// else (tentative, busy, out of office, working elsewhere) counts as busy.
/// Consecutive intervals of the same kind are coalesced in a single pass.
fn parse_availability_view(
    view: &str,
    start: DateTime<Utc>,
) -> (Vec<TimeSlot>, Vec<TimeSlot>) {
    let step = Duration::minutes(AVAILABILITY_VIEW_INTERVAL_MINUTES);
    let mut busy = Vec::new();
    let mut available = Vec::new();
    let mut run_start: Option<(DateTime<Utc>, bool)> = None;
    let mut cursor = start;

    for ch in view.chars() {
        let is_busy = ch != '0';
        match run_start {
            Some((_, kind)) if kind == is_busy => {}
            Some((began, kind)) => {
                let slot = TimeSlot::new(began, cursor);
                if kind { busy.push(slot) } else { available.push(slot) }
                run_start = Some((cursor, is_busy));
            }
            None => run_start = Some((cursor, is_busy)),
        }
        cursor += step;
    }
    if let Some((began, kind)) = run_start {
        let slot = TimeSlot::new(began, cursor);
        if kind { busy.push(slot) } else { available.push(slot) }
    }

    (busy, available)
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct GraphCollection<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphCalendar {
    id: String,
    name: String,
    #[serde(default)]
    is_default_calendar: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    time_zone: String,
}

impl GraphDateTime {
    fn from_utc(t: DateTime<Utc>) -> Self {
        Self {
            date_time: t.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            time_zone: "UTC".to_string(),
        }
    }

    /// Graph returns fractional-second naive timestamps qualified by a
    /// `timeZone` name. Requests pin responses to UTC via the `Prefer`
    /// header, but the named zone is honored when Graph answers otherwise.
    fn resolve(&self) -> Result<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(&self.date_time, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|e| {
                CalendarError::Serialization(format!("bad graph timestamp {:?}: {e}", self.date_time))
            })?;
        if self.time_zone.is_empty() || self.time_zone.eq_ignore_ascii_case("utc") {
            return Ok(naive.and_utc());
        }
        let tz = resolve_timezone(Some(&self.time_zone))?;
        local_to_utc(naive, tz)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEmailAddress {
    address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttendee {
    email_address: GraphEmailAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphLocation {
    display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody {
    content_type: String,
    content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtendedProperty {
    id: String,
    value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    #[serde(default, skip_serializing)]
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<GraphBody>,
    start: GraphDateTime,
    end: GraphDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<GraphLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attendees: Vec<GraphAttendee>,
    #[serde(default, skip_serializing)]
    organizer: Option<GraphAttendee>,
    #[serde(default, skip_serializing)]
    is_cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    show_as: Option<String>,
    #[serde(default, skip_serializing)]
    recurrence: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    single_value_extended_properties: Vec<ExtendedProperty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_reminder_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reminder_minutes_before_start: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleInfo {
    schedule_id: String,
    #[serde(default)]
    availability_view: String,
}

// --- Conversions ---

fn into_event(raw: GraphEvent) -> Result<CalendarEvent> {
    let start = raw.start.resolve()?;
    let end = raw.end.resolve()?;

    let status = if raw.is_cancelled {
        EventStatus::Cancelled
    } else if raw.show_as.as_deref() == Some("tentative") {
        EventStatus::Tentative
    } else {
        EventStatus::Confirmed
    };

    let patient = raw
        .single_value_extended_properties
        .iter()
        .find(|prop| prop.id == PATIENT_PROPERTY_ID)
        .and_then(|prop| serde_json::from_str(&prop.value).ok());

    Ok(CalendarEvent {
        id: raw.id.clone(),
        title: raw.subject.unwrap_or_default(),
        description: raw.body.map(|b| b.content),
        start,
        end,
        timezone: Some(raw.start.time_zone),
        location: raw.location.map(|l| l.display_name),
        status,
        attendees: raw
            .attendees
            .into_iter()
            .map(|a| Attendee { email: a.email_address.address, name: a.email_address.name })
            .collect(),
        organizer: raw
            .organizer
            .map(|o| Attendee { email: o.email_address.address, name: o.email_address.name }),
        recurrence: raw.recurrence.map(|r| r.to_string()),
        patient,
        provider: CalendarProvider::Outlook,
        provider_event_id: raw.id,
    })
}

fn into_wire(details: &AppointmentDetails) -> Result<GraphEvent> {
    let properties = match &details.patient {
        Some(patient) => vec![ExtendedProperty {
            id: PATIENT_PROPERTY_ID.to_string(),
            value: serde_json::to_string(patient)?,
        }],
        None => vec![],
    };

    Ok(GraphEvent {
        id: String::new(),
        subject: Some(details.title.clone()),
        body: details.description.as_ref().map(|text| GraphBody {
            content_type: "text".to_string(),
            content: text.clone(),
        }),
        start: GraphDateTime::from_utc(details.start),
        end: GraphDateTime::from_utc(details.end),
        location: details
            .location
            .as_ref()
            .map(|name| GraphLocation { display_name: name.clone() }),
        attendees: details
            .attendees
            .iter()
            .map(|a| GraphAttendee {
                email_address: GraphEmailAddress { address: a.email.clone(), name: a.name.clone() },
            })
            .collect(),
        organizer: None,
        is_cancelled: false,
        show_as: Some("busy".to_string()),
        recurrence: None,
        single_value_extended_properties: properties,
        is_reminder_on: Some(details.reminder_minutes.is_some()),
        reminder_minutes_before_start: details.reminder_minutes,
    })
}

#[async_trait]
impl CalendarProviderApi for OutlookCalendarProvider {
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::Outlook
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<OAuthTokens> {
        let oauth = self.oauth.as_ref().ok_or_else(|| {
            CalendarError::Auth("no Outlook OAuth client configured".to_string())
        })?;
        let scope = oauth.scopes.join(" ");
        let params = [
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
            ("scope", scope.as_str()),
        ];
        let mut tokens = request_tokens(&self.client, &self.token_url, &params).await?;
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
        let url = format!("{}/me/calendars", self.base_url);
        let list: GraphCollection<GraphCalendar> = self.get_json(access_token, &url, &[]).await?;
        Ok(list
            .value
            .into_iter()
            .map(|cal| CalendarInfo {
                id: cal.id,
                name: cal.name,
                description: None,
                timezone: None,
                primary: cal.is_default_calendar,
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
        let url = format!(
            "{}/me/calendars/{}/calendarView",
            self.base_url,
            urlencoding::encode(&conn.calendar_id)
        );
        let query = [
            ("startDateTime", to_rfc3339_utc(start)),
            ("endDateTime", to_rfc3339_utc(end)),
            ("$expand", Self::expand_clause()),
            ("$top", PAGE_SIZE.to_string()),
            ("$orderby", "start/dateTime".to_string()),
        ];
        let list: GraphCollection<GraphEvent> = self.get_json(access_token, &url, &query).await?;
        debug!(count = list.value.len(), calendar = %conn.calendar_id, "fetched outlook events");
        list.value.into_iter().map(into_event).collect()
    }

    async fn get_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        event_id: &str,
    ) -> Result<CalendarEvent> {
        let url = self.event_url(&conn.calendar_id, event_id);
        let query = [("$expand", Self::expand_clause())];
        let raw: GraphEvent = self.get_json(access_token, &url, &query).await?;
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
            .header("Prefer", "outlook.timezone=\"UTC\"")
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        let response = self.check_response(response).await?;
        let raw: GraphEvent =
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
            .patch(self.event_url(&conn.calendar_id, event_id))
            .bearer_auth(access_token)
            .header("Prefer", "outlook.timezone=\"UTC\"")
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        let response = self.check_response(response).await?;
        let raw: GraphEvent =
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
        let schedule_id = query
            .calendar_ids
            .first()
            .cloned()
            .unwrap_or_else(|| conn.calendar_id.clone());
        let body = serde_json::json!({
            "schedules": [schedule_id],
            "startTime": GraphDateTime::from_utc(query.start),
            "endTime": GraphDateTime::from_utc(query.end),
            "availabilityViewInterval": AVAILABILITY_VIEW_INTERVAL_MINUTES,
        });

        let response = self
            .client
            .post(format!("{}/me/calendar/getSchedule", self.base_url))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        let response = self.check_response(response).await?;
        let reply: GraphCollection<ScheduleInfo> =
            response.json().await.map_err(|e| CalendarError::Serialization(e.to_string()))?;

        let schedule = reply.value.into_iter().next().ok_or_else(|| {
            CalendarError::Serialization("getSchedule returned no schedules".to_string())
        })?;
        let (busy, available) = parse_availability_view(&schedule.availability_view, query.start);

        Ok(FreeBusyResponse { calendar_id: schedule.schedule_id, busy, available })
    }
}
