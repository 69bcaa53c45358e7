//! Apple iCloud calendar provider
//!
//! Speaks CalDAV (RFC 4791) against `caldav.icloud.com` with HTTP Basic
//! authentication: the connection metadata carries the iCloud username under
//! `caldav_username`, and the stored access token is the user's app-specific
//! password. Passwords never expire, so token refresh is a hard error here.
//!
//! Events are individual `.ics` resources under the calendar collection;
//! free/busy is derived from a time-range `REPORT` since iCloud offers no
//! native free/busy query.

pub mod ical;
pub mod xml;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use tracing::debug;
use uuid::Uuid;

use calbridge_domain::availability::{complement, merge_busy};
use calbridge_domain::{
    AppointmentDetails, CalendarConnection, CalendarError, CalendarEvent, CalendarInfo,
    CalendarProvider, EventStatus, FreeBusyQuery, FreeBusyResponse, OAuthTokens, Result, TimeSlot,
};

use crate::providers::traits::CalendarProviderApi;

const DEFAULT_BASE_URL: &str = "https://caldav.icloud.com";
const USERNAME_KEYS: [&str; 2] = ["caldav_username", "apple_username"];

/// CalDAV adapter for Apple iCloud calendars.
pub struct AppleCalDavProvider {
    client: Client,
    base_url: String,
}

impl AppleCalDavProvider {
    /// # Errors
    /// Fails when the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self { client: crate::http_client()?, base_url: DEFAULT_BASE_URL.to_string() })
    }

    /// Point the adapter at a different CalDAV server (tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn username(conn: &CalendarConnection) -> Result<&str> {
        USERNAME_KEYS.iter().find_map(|key| conn.metadata_str(key)).ok_or_else(|| {
            CalendarError::Auth(format!(
                "connection {} has no caldav_username metadata",
                conn.id
            ))
        })
    }

    /// The calendar id is the collection path relative to the server root.
    fn collection_url(&self, conn: &CalendarConnection) -> String {
        let path = conn.calendar_id.trim_matches('/');
        format!("{}/{}/", self.base_url, path)
    }

    fn resource_url(&self, conn: &CalendarConnection, event_id: &str) -> String {
        format!("{}{}.ics", self.collection_url(conn), urlencoding::encode(event_id))
    }

    async fn dav_request(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        method: Method,
        url: &str,
        depth: Option<&str>,
        body: Option<String>,
        content_type: &str,
    ) -> Result<(StatusCode, String)> {
        let username = Self::username(conn)?;
        let mut request = self
            .client
            .request(method, url)
            .basic_auth(username, Some(access_token))
            .header("Content-Type", content_type);
        if let Some(depth) = depth {
            request = request.header("Depth", depth);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response =
            request.send().await.map_err(|e| CalendarError::Network(e.to_string()))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            Ok((status, text))
        } else {
            Err(CalendarError::CalDav { status: status.as_u16(), message: text })
        }
    }

    /// Fetch and parse every event resource overlapping the window.
    async fn query_events(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let body = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:time-range start="{}" end="{}"/>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#,
            ical::caldav_timestamp(start),
            ical::caldav_timestamp(end),
        );

        let (_, text) = self
            .dav_request(
                conn,
                access_token,
                Method::from_bytes(b"REPORT")
                    .map_err(|e| CalendarError::Internal(e.to_string()))?,
                &self.collection_url(conn),
                Some("1"),
                Some(body),
                "application/xml; charset=utf-8",
            )
            .await?;

        let mut events = Vec::new();
        for entry in xml::parse_multistatus(&text)? {
            let Some(data) = entry.calendar_data else { continue };
            let event_id = resource_name(&entry.href);
            events.push(ical::parse_vevent(&data, &event_id)?);
        }
        debug!(count = events.len(), calendar = %conn.calendar_id, "fetched caldav events");
        Ok(events)
    }
}

/// Derive the event id from a resource href (`.../evt-1.ics` -> `evt-1`).
fn resource_name(href: &str) -> String {
    let name = href.trim_end_matches('/').rsplit('/').next().unwrap_or(href);
    let name = name.strip_suffix(".ics").unwrap_or(name);
    urlencoding::decode(name).map(|s| s.into_owned()).unwrap_or_else(|_| name.to_string())
}

#[async_trait]
impl CalendarProviderApi for AppleCalDavProvider {
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::Apple
    }

    async fn refresh_tokens(&self, _refresh_token: &str) -> Result<OAuthTokens> {
        Err(CalendarError::Auth(
            "Apple app-specific passwords cannot be refreshed; generate a new one at appleid.apple.com"
                .to_string(),
        ))
    }

    async fn list_calendars(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
    ) -> Result<Vec<CalendarInfo>> {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <c:calendar-description/>
  </d:prop>
</d:propfind>"#;

        // The calendar home is the parent collection of the configured
        // calendar path.
        let collection = self.collection_url(conn);
        let home = collection
            .trim_end_matches('/')
            .rsplit_once('/')
            .map_or(collection.clone(), |(parent, _)| format!("{parent}/"));

        let (_, text) = self
            .dav_request(
                conn,
                access_token,
                Method::from_bytes(b"PROPFIND")
                    .map_err(|e| CalendarError::Internal(e.to_string()))?,
                &home,
                Some("1"),
                Some(body.to_string()),
                "application/xml; charset=utf-8",
            )
            .await?;

        let calendars = xml::parse_multistatus(&text)?
            .into_iter()
            .filter(|entry| entry.is_calendar)
            .map(|entry| CalendarInfo {
                name: entry
                    .display_name
                    .clone()
                    .unwrap_or_else(|| resource_name(&entry.href)),
                id: entry.href.trim_matches('/').to_string(),
                description: entry.description,
                timezone: None,
                primary: false,
            })
            .collect();
        Ok(calendars)
    }

    async fn get_events(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        self.query_events(conn, access_token, start, end).await
    }

    async fn get_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        event_id: &str,
    ) -> Result<CalendarEvent> {
        let url = self.resource_url(conn, event_id);
        let (_, text) = self
            .dav_request(conn, access_token, Method::GET, &url, None, None, "text/calendar")
            .await?;
        ical::parse_vevent(&text, event_id)
    }

    async fn create_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        details: &AppointmentDetails,
    ) -> Result<CalendarEvent> {
        let uid = Uuid::new_v4().to_string();
        let ics = ical::build_vevent(&uid, details)?;
        let url = self.resource_url(conn, &uid);

        let username = Self::username(conn)?;
        let response = self
            .client
            .put(&url)
            .basic_auth(username, Some(access_token))
            .header("Content-Type", "text/calendar; charset=utf-8")
            .header("If-None-Match", "*")
            .body(ics.clone())
            .send()
            .await
            .map_err(|e| CalendarError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CalendarError::CalDav { status: status.as_u16(), message });
        }

        // CalDAV PUT returns no body; echo back what was stored.
        ical::parse_vevent(&ics, &uid)
    }

    async fn update_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        event_id: &str,
        details: &AppointmentDetails,
    ) -> Result<CalendarEvent> {
        // Keep the original UID stable across reschedules.
        let existing = self.get_event(conn, access_token, event_id).await?;
        let ics = ical::build_vevent(&existing.provider_event_id, details)?;
        let url = self.resource_url(conn, event_id);

        self.dav_request(
            conn,
            access_token,
            Method::PUT,
            &url,
            None,
            Some(ics.clone()),
            "text/calendar; charset=utf-8",
        )
        .await?;
        ical::parse_vevent(&ics, event_id)
    }

    async fn delete_event(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        event_id: &str,
    ) -> Result<()> {
        let url = self.resource_url(conn, event_id);
        self.dav_request(conn, access_token, Method::DELETE, &url, None, None, "text/calendar")
            .await?;
        Ok(())
    }

    async fn get_free_busy(
        &self,
        conn: &CalendarConnection,
        access_token: &str,
        query: &FreeBusyQuery,
    ) -> Result<FreeBusyResponse> {
        let events = self.query_events(conn, access_token, query.start, query.end).await?;
        let busy = merge_busy(
            events
                .iter()
                .filter(|event| event.status != EventStatus::Cancelled)
                .map(|event| TimeSlot::new(event.start, event.end))
                .collect(),
        );
        let window = TimeSlot::new(query.start, query.end);
        let available = complement(&window, &busy);
        Ok(FreeBusyResponse { calendar_id: conn.calendar_id.clone(), busy, available })
    }
}
