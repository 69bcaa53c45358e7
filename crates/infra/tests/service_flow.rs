//! End-to-end facade tests: a Google-backed service over a mock API server,
//! with real encryption and an in-memory store underneath.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use calbridge_common::{AesGcmTokenCipher, KeyValueStore, MemoryKeyValueStore};
use calbridge_domain::constants::CONNECTIONS_STORE_KEY;
use calbridge_domain::{
    AppointmentDetails, CalendarConnection, CalendarProvider, ConnectionStatus, OAuthTokens,
};
use calbridge_infra::providers::{CalendarProviderApi, GoogleCalendarProvider};
use calbridge_infra::{CalendarService, ConnectionStore};

fn ts(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).unwrap()
}

fn connection() -> CalendarConnection {
    CalendarConnection {
        id: "conn-1".to_string(),
        provider: CalendarProvider::Google,
        calendar_id: "primary".to_string(),
        tokens: OAuthTokens::new(
            "access-token".to_string(),
            Some("refresh-token".to_string()),
            Some(3600),
            Some("Bearer".to_string()),
            vec![],
        ),
        status: ConnectionStatus::Active,
        timezone: None,
        metadata: serde_json::Value::Null,
    }
}

fn details(start: DateTime<Utc>, end: DateTime<Utc>) -> AppointmentDetails {
    AppointmentDetails {
        title: "Consultation".to_string(),
        description: None,
        start,
        end,
        timezone: None,
        location: None,
        attendees: vec![],
        patient: Some(json!({"id": "p-1"})),
        reminder_minutes: None,
    }
}

async fn service_for(
    server: &MockServer,
    kv: Arc<MemoryKeyValueStore>,
) -> CalendarService {
    let store = ConnectionStore::new(
        kv,
        Arc::new(AesGcmTokenCipher::new(&AesGcmTokenCipher::generate_key()).unwrap()),
    );
    let mut providers: HashMap<CalendarProvider, Arc<dyn CalendarProviderApi>> = HashMap::new();
    providers.insert(
        CalendarProvider::Google,
        Arc::new(GoogleCalendarProvider::new(None).unwrap().with_base_url(server.uri())),
    );
    CalendarService::with_providers(store, providers).await.unwrap()
}

async fn mock_calendar_list(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/users/me/calendarList"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "primary", "summary": "Primary", "primary": true}]
        })))
        .mount(server)
        .await;
}

fn event_body(id: &str, start: &str, end: &str) -> serde_json::Value {
    json!({
        "id": id,
        "summary": "Consultation",
        "status": "confirmed",
        "start": {"dateTime": start},
        "end": {"dateTime": end}
    })
}

#[tokio::test]
async fn registration_persists_encrypted_tokens() {
    let server = MockServer::start().await;
    mock_calendar_list(&server).await;

    let kv = Arc::new(MemoryKeyValueStore::new());
    let service = service_for(&server, kv.clone()).await;

    let result = service.register_connection(connection()).await;
    assert!(result.success);
    assert_eq!(result.data.unwrap().status, ConnectionStatus::Active);

    // The persisted blob never contains plaintext tokens.
    let blob = kv.get(CONNECTIONS_STORE_KEY).await.unwrap().unwrap();
    assert!(!blob.contains("access-token"));
    assert!(!blob.contains("refresh-token"));
    assert!(blob.contains("conn-1"));
}

#[tokio::test]
async fn second_booking_of_the_same_slot_is_a_conflict() {
    let server = MockServer::start().await;
    mock_calendar_list(&server).await;

    // First conflict check sees an empty calendar; after the booking the
    // calendar returns the created event.
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [event_body("evt-1", "2025-06-02T10:00:00Z", "2025-06-02T10:30:00Z")]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(event_body(
            "evt-1",
            "2025-06-02T10:00:00Z",
            "2025-06-02T10:30:00Z",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let service = service_for(&server, Arc::new(MemoryKeyValueStore::new())).await;
    assert!(service.register_connection(connection()).await.success);

    let first = service.create_appointment("conn-1", &details(ts(10, 0), ts(10, 30))).await;
    assert!(first.success);
    assert_eq!(first.data.unwrap().provider_event_id, "evt-1");

    let second = service.create_appointment("conn-1", &details(ts(10, 15), ts(10, 45))).await;
    assert!(!second.success);
    let error = second.error.unwrap();
    assert_eq!(error.code, "APPOINTMENT_CONFLICT");
    assert!(!error.retryable);
}

#[tokio::test]
async fn connections_survive_a_service_restart() {
    let server = MockServer::start().await;
    mock_calendar_list(&server).await;

    let kv = Arc::new(MemoryKeyValueStore::new());
    let cipher_key = AesGcmTokenCipher::generate_key();

    {
        let store = ConnectionStore::new(kv.clone(), Arc::new(AesGcmTokenCipher::new(&cipher_key).unwrap()));
        let mut providers: HashMap<CalendarProvider, Arc<dyn CalendarProviderApi>> =
            HashMap::new();
        providers.insert(
            CalendarProvider::Google,
            Arc::new(GoogleCalendarProvider::new(None).unwrap().with_base_url(server.uri())),
        );
        let service = CalendarService::with_providers(store, providers).await.unwrap();
        assert!(service.register_connection(connection()).await.success);
    }

    // New service instance over the same storage and key.
    let store =
        ConnectionStore::new(kv, Arc::new(AesGcmTokenCipher::new(&cipher_key).unwrap()));
    let mut providers: HashMap<CalendarProvider, Arc<dyn CalendarProviderApi>> = HashMap::new();
    providers.insert(
        CalendarProvider::Google,
        Arc::new(GoogleCalendarProvider::new(None).unwrap().with_base_url(server.uri())),
    );
    let service = CalendarService::with_providers(store, providers).await.unwrap();

    let connections = service.list_connections().await;
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].tokens.access_token, "access-token");

    assert!(service.list_calendars("conn-1").await.success);
}

#[tokio::test]
async fn provider_failure_maps_to_a_structured_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me/calendarList"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let service = service_for(&server, Arc::new(MemoryKeyValueStore::new())).await;
    let result = service.register_connection(connection()).await;
    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, "GOOGLE_API_ERROR_500");
    assert!(error.retryable);
}
