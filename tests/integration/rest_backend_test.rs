//! RestBackend against a mocked PostgREST/realtime server

use assert_matches::assert_matches;
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aurilog_sync::app::remote::{Backend, Filter, RestBackend};
use aurilog_sync::shared::error::BackendError;
use aurilog_sync::shared::models::Order;
use aurilog_sync::shared::{ChangeKind, EventMask};

use crate::common::row;

async fn backend() -> (MockServer, RestBackend) {
    let server = MockServer::start().await;
    let backend = RestBackend::new(server.uri(), Some("anon-key".to_string()));
    (server, backend)
}

#[tokio::test]
async fn test_select_sends_filters_order_and_key() {
    let (server, backend) = backend().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/trips"))
        .and(query_param("user_id", "eq.driver-1"))
        .and(query_param("order", "date.desc"))
        .and(header("apikey", "anon-key"))
        .and(header("Authorization", "Bearer anon-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 2, "date": "2024-06-02"},
            {"id": 1, "date": "2024-06-01"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = backend
        .select("trips", &[Filter::eq("user_id", "driver-1")], Some(&Order::descending("date")))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"], 2);
}

#[tokio::test]
async fn test_notification_filter_uses_or_clause() {
    let (server, backend) = backend().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/notifications"))
        .and(query_param("or", "(target_user_email.is.null,target_user_email.eq.ana@fleet.test)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = backend
        .select("notifications", &[Filter::eq_or_null("target_user_email", "ana@fleet.test")], None)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_insert_returns_representation() {
    let (server, backend) = backend().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/expenses"))
        .and(header("Prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([
            {"id": "e1", "amount": 120, "user_id": "driver-1"}
        ])))
        .mount(&server)
        .await;

    let stored = backend
        .insert("expenses", row(json!({"amount": 120, "user_id": "driver-1"})))
        .await
        .unwrap();
    assert_eq!(stored["id"], "e1");
}

#[tokio::test]
async fn test_scoped_update_with_no_match_is_not_found() {
    let (server, backend) = backend().await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/trips"))
        .and(query_param("id", "eq.t9"))
        .and(query_param("user_id", "eq.driver-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let err = backend
        .update("trips", "t9", "driver-1", row(json!({"status": "closed"})))
        .await
        .unwrap_err();
    assert_matches!(err, BackendError::NotFound { .. });
}

#[tokio::test]
async fn test_status_mapping() {
    let (server, backend) = backend().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/vehicles"))
        .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/vehicles"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate plate"))
        .mount(&server)
        .await;

    assert_matches!(
        backend.delete("vehicles", "v1", "driver-1").await,
        Err(BackendError::Forbidden { .. })
    );
    let err = backend.insert("vehicles", row(json!({"plate": "X"}))).await.unwrap_err();
    assert_matches!(err, BackendError::Rejected { status: 409, .. });
    assert!(err.is_permanent());
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let backend = RestBackend::new("http://127.0.0.1:9", None);
    let err = backend.select("trips", &[], None).await.unwrap_err();
    assert_matches!(err, BackendError::Transport(_));
    assert!(!err.is_permanent());
}

#[tokio::test]
async fn test_realtime_stream_is_forwarded() {
    let (server, backend) = backend().await;
    let body = concat!(
        ": keep-alive\n\n",
        "event: update\n",
        "data: {\"table\":\"driver_locations\",\"kind\":\"update\",\"record\":{\"email\":\"ana@fleet.test\",\"latitude\":-22.9,\"longitude\":-47.0,\"updated_at\":\"2024-06-01T12:00:00Z\"},\"commit_timestamp\":\"2024-06-01T12:00:00Z\"}\n\n",
        "event: delete\n",
        "data: {\"table\":\"driver_locations\",\"kind\":\"delete\",\"old_record\":{\"email\":\"ana@fleet.test\"},\"commit_timestamp\":\"2024-06-01T12:01:00Z\"}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/realtime/v1/driver_locations"))
        .and(query_param("events", "insert,update"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let (sink, mut events) = mpsc::unbounded_channel();
    let handle = backend
        .subscribe("driver_locations", EventMask::UPSERTS, sink)
        .await
        .unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, ChangeKind::Update);
    assert_eq!(event.record.unwrap()["email"], "ana@fleet.test");

    // The delete is masked out and the stream then ends
    assert!(events.recv().await.is_none());
    backend.unsubscribe(handle).await.unwrap();
}
