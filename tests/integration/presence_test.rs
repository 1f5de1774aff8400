//! Realtime presence and roster scenarios

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use aurilog_sync::app::presence::PresenceTracker;
use aurilog_sync::app::remote::{Backend, ChangeSink, Filter, MemoryBackend, SubscriptionHandle};
use aurilog_sync::shared::error::BackendError;
use aurilog_sync::shared::models::{Order, Record, PRESENCE_TABLE, ROSTER_TABLE};
use aurilog_sync::shared::{ChangeEvent, ChangeKind, EventMask};

use crate::common::{eventually, row};

fn location(email: &str, latitude: f64, at: DateTime<Utc>) -> ChangeEvent {
    ChangeEvent::new(
        PRESENCE_TABLE,
        ChangeKind::Update,
        Some(row(json!({
            "email": email,
            "latitude": latitude,
            "longitude": -47.06,
            "updated_at": at.to_rfc3339(),
        }))),
    )
}

fn tracker() -> (PresenceTracker, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        ROSTER_TABLE,
        vec![
            row(json!({"id": "p1", "email": "ana@fleet.test", "full_name": "Ana"})),
            row(json!({"id": "p2", "email": "joao@fleet.test", "full_name": "Joao"})),
        ],
    );
    (PresenceTracker::new(backend.clone(), Duration::minutes(10)), backend)
}

#[tokio::test]
async fn test_pushed_locations_upsert_by_email() {
    let (tracker, backend) = tracker();
    let subscription = tracker.start().await.unwrap();
    let now = Utc::now();

    backend.emit(location("ana@fleet.test", -22.90, now));
    backend.emit(location("ana@fleet.test", -22.95, now + Duration::seconds(30)));

    assert!(
        eventually(|| {
            let tracker = tracker.clone();
            async move {
                tracker
                    .presence_for("ana@fleet.test")
                    .await
                    .is_some_and(|p| p.latitude == -22.95)
            }
        })
        .await
    );
    assert_eq!(tracker.presence().await.len(), 1);

    subscription.stop().await.unwrap();
}

#[tokio::test]
async fn test_liveness_window_boundary() {
    let (tracker, _) = tracker();
    let now = Utc::now();
    tracker.apply_event(location("ana@fleet.test", 0.0, now - Duration::seconds(9 * 60 + 59))).await.unwrap();
    tracker.apply_event(location("joao@fleet.test", 0.0, now - Duration::seconds(10 * 60 + 1))).await.unwrap();

    assert!(tracker.is_online("ana@fleet.test", now).await);
    assert!(!tracker.is_online("joao@fleet.test", now).await);
}

#[tokio::test]
async fn test_removed_driver_leaves_roster_but_keeps_presence() {
    let (tracker, backend) = tracker();
    let subscription = tracker.start().await.unwrap();
    tracker.apply_event(location("joao@fleet.test", 0.0, Utc::now())).await.unwrap();
    assert_eq!(tracker.roster().await.len(), 2);

    assert!(backend.admin_delete(ROSTER_TABLE, "p2"));

    assert!(
        eventually(|| {
            let tracker = tracker.clone();
            async move { tracker.roster().await.len() == 1 }
        })
        .await
    );
    assert_eq!(tracker.roster().await[0].email, "ana@fleet.test");
    assert!(tracker.presence_for("joao@fleet.test").await.is_some());

    subscription.stop().await.unwrap();
}

#[tokio::test]
async fn test_remount_does_not_duplicate_delivery() {
    let (tracker, backend) = tracker();

    let first = tracker.start().await.unwrap();
    first.stop().await.unwrap();
    let second = tracker.start().await.unwrap();

    assert_eq!(backend.subscriber_count(PRESENCE_TABLE), 1);
    assert_eq!(backend.subscriber_count(ROSTER_TABLE), 1);

    drop(second);
    assert!(
        eventually(|| {
            let backend = backend.clone();
            async move { backend.subscriber_count(PRESENCE_TABLE) == 0 }
        })
        .await
    );
}

/// Backend where a driver pings while the presence snapshot is being read
struct PingDuringLoad {
    inner: MemoryBackend,
    ping: ChangeEvent,
}

#[async_trait]
impl Backend for PingDuringLoad {
    async fn select(&self, table: &str, filters: &[Filter], order: Option<&Order>) -> Result<Vec<Record>, BackendError> {
        let rows = self.inner.select(table, filters, order).await?;
        if table == PRESENCE_TABLE {
            self.inner.emit(self.ping.clone());
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, BackendError> {
        self.inner.insert(table, record).await
    }

    async fn update(&self, table: &str, id: &str, owner_id: &str, patch: Record) -> Result<Record, BackendError> {
        self.inner.update(table, id, owner_id, patch).await
    }

    async fn delete(&self, table: &str, id: &str, owner_id: &str) -> Result<(), BackendError> {
        self.inner.delete(table, id, owner_id).await
    }

    async fn subscribe(&self, table: &str, mask: EventMask, sink: ChangeSink) -> Result<SubscriptionHandle, BackendError> {
        self.inner.subscribe(table, mask, sink).await
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), BackendError> {
        self.inner.unsubscribe(handle).await
    }
}

#[tokio::test]
async fn test_ping_during_snapshot_load_is_kept() {
    let now = Utc::now();
    let inner = MemoryBackend::new();
    inner.seed(
        PRESENCE_TABLE,
        vec![row(json!({
            "email": "ana@fleet.test",
            "latitude": -22.90,
            "longitude": -47.06,
            "updated_at": (now - Duration::minutes(30)).to_rfc3339(),
        }))],
    );
    let backend = Arc::new(PingDuringLoad { inner, ping: location("ana@fleet.test", -22.95, now) });
    let tracker = PresenceTracker::new(backend, Duration::minutes(10));

    let subscription = tracker.start().await.unwrap();
    assert!(
        eventually(|| {
            let tracker = tracker.clone();
            async move { tracker.is_online("ana@fleet.test", now).await }
        })
        .await
    );
    assert_eq!(tracker.presence_for("ana@fleet.test").await.unwrap().latitude, -22.95);

    subscription.stop().await.unwrap();
}
