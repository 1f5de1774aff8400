//! Offline write and reconnect replay scenarios

use assert_matches::assert_matches;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use aurilog_sync::app::cache::CacheSource;
use aurilog_sync::app::remote::{Backend, ChangeSink, Filter, MemoryBackend, SubscriptionHandle};
use aurilog_sync::app::sync::{Connectivity, ConnectivityMonitor, ReplayReport};
use aurilog_sync::shared::error::{BackendError, SyncError};
use aurilog_sync::shared::models::{record_id, Action, EntityTable, Order, Record};
use aurilog_sync::shared::{AppConfig, EventMask};

use crate::common::{engine_with, offline_engine, row, USER_ID};

#[tokio::test]
async fn test_trips_created_offline_replay_in_order() {
    let (engine, backend) = offline_engine().await;

    for origin in ["A", "B"] {
        let outcome = engine
            .perform(EntityTable::Trips, Action::Insert, row(json!({"origin": origin, "date": "2024-06-01"})))
            .await
            .unwrap();
        assert!(outcome.is_queued());
    }
    assert_eq!(engine.cache().len(EntityTable::Trips).await, 2);

    engine.monitor().signal_online();
    let report = engine.on_reconnect().await.unwrap();
    assert_eq!(report, ReplayReport { replayed: 2, ..Default::default() });

    let origins: Vec<_> = backend.applied().iter().map(|m| m.record["origin"].clone()).collect();
    assert_eq!(origins, [json!("A"), json!("B")]);

    let entries = engine.cache().entries(EntityTable::Trips).await;
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|entry| !entry.is_provisional()));
    assert_eq!(engine.cache().source(EntityTable::Trips).await, Some(CacheSource::Backend));
    assert!(engine.queue().is_empty().await.unwrap());
}

#[tokio::test]
async fn test_failed_item_does_not_block_later_items() {
    let (engine, backend) = offline_engine().await;
    backend.fail_when("expenses", Action::Insert, 422, "amount must be positive", |record| {
        record["amount"] == json!(-1)
    });

    for amount in [10, -1, 30] {
        engine
            .perform(EntityTable::Expenses, Action::Insert, row(json!({"amount": amount})))
            .await
            .unwrap();
    }

    engine.monitor().signal_online();
    let report = engine.on_reconnect().await.unwrap();
    assert_eq!(report.replayed, 2);
    assert_eq!(report.failed, 1);

    let amounts: Vec<_> = backend.applied().iter().map(|m| m.record["amount"].clone()).collect();
    assert_eq!(amounts, [json!(10), json!(30)]);

    let left = engine.queue().pending().await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].payload["amount"], json!(-1));
    assert_eq!(left[0].attempts, 1);
    assert!(left[0].last_error.as_deref().unwrap_or_default().contains("amount must be positive"));
}

#[tokio::test]
async fn test_permanent_failure_is_dead_lettered_at_cap() {
    let backend = Arc::new(MemoryBackend::new());
    let config = AppConfig::builder().max_replay_attempts(2).build().unwrap();
    let engine = engine_with(&config, backend.clone(), Connectivity::Offline).await;
    backend.fail_when("vehicles", Action::Insert, 400, "plate is required", |_| true);

    engine
        .perform(EntityTable::Vehicles, Action::Insert, row(json!({"model": "Actros"})))
        .await
        .unwrap();
    engine.monitor().signal_online();

    let first = engine.on_reconnect().await.unwrap();
    assert_eq!(first.failed, 1);
    let second = engine.on_reconnect().await.unwrap();
    assert_eq!(second.dead_lettered, 1);

    assert!(engine.queue().is_empty().await.unwrap());
    let parked = engine.queue().dead_letters().await.unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].operation.attempts, 2);

    let status = engine.status().await.unwrap();
    assert_eq!(status.dead_letters, 1);
    assert_eq!(status.pending_operations, 0);
}

#[tokio::test]
async fn test_transient_failure_stays_queued() {
    let backend = Arc::new(MemoryBackend::new());
    let config = AppConfig::builder().max_replay_attempts(1).build().unwrap();
    let engine = engine_with(&config, backend.clone(), Connectivity::Offline).await;
    backend.fail_when("maintenance", Action::Insert, 503, "maintenance window", |_| true);

    engine
        .perform(EntityTable::Maintenance, Action::Insert, row(json!({"service": "oil"})))
        .await
        .unwrap();
    engine.monitor().signal_online();

    for _ in 0..3 {
        engine.on_reconnect().await.unwrap();
    }
    let pending = engine.queue().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 3);
    assert!(engine.queue().dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_owner_mutation_leaves_cache_unchanged() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        "trips",
        vec![
            row(json!({"id": "t1", "user_id": USER_ID, "status": "open", "date": "2024-06-02"})),
            row(json!({"id": "t9", "user_id": "someone-else", "status": "open", "date": "2024-06-01"})),
        ],
    );
    let engine = engine_with(&AppConfig::default(), backend.clone(), Connectivity::Online).await;
    engine.refresh(EntityTable::Trips).await.unwrap();
    let before = engine.cache().list(EntityTable::Trips).await;

    let err = engine
        .perform(
            EntityTable::Trips,
            Action::Update,
            row(json!({"id": "t9", "status": "closed"})),
        )
        .await
        .unwrap_err();

    assert_matches!(err, SyncError::Backend(BackendError::NotFound { .. }));
    assert_eq!(engine.cache().list(EntityTable::Trips).await, before);
    assert_eq!(backend.rows("trips")[1]["status"], "open");
    assert_eq!(engine.status().await.unwrap().errors.len(), 1);
}

#[tokio::test]
async fn test_payload_cannot_hand_rows_to_another_account() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed("trips", vec![row(json!({"id": "t1", "user_id": USER_ID, "status": "open"}))]);
    let engine = engine_with(&AppConfig::default(), backend.clone(), Connectivity::Online).await;

    let err = engine
        .perform(EntityTable::Trips, Action::Update, row(json!({"id": "t1", "user_id": "driver-2"})))
        .await
        .unwrap_err();
    assert_matches!(err, SyncError::Validation { .. });

    let err = engine
        .perform(EntityTable::Trips, Action::Insert, row(json!({"origin": "X", "user_id": "driver-2"})))
        .await
        .unwrap_err();
    assert_matches!(err, SyncError::Validation { .. });

    // Naming the session owner explicitly is fine and keeps the row where it is
    engine
        .perform(EntityTable::Trips, Action::Update, row(json!({"id": "t1", "user_id": USER_ID, "status": "closed"})))
        .await
        .unwrap();

    let rows = backend.rows("trips");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["user_id"], USER_ID);
    assert_eq!(rows[0]["status"], "closed");
    assert!(backend.applied().iter().all(|m| m.record["user_id"] == USER_ID));
}

#[tokio::test]
async fn test_foreign_owner_is_refused_while_offline() {
    let (engine, _backend) = offline_engine().await;
    let err = engine
        .perform(EntityTable::Expenses, Action::Insert, row(json!({"amount": 5, "user_id": "driver-2"})))
        .await
        .unwrap_err();
    assert_matches!(err, SyncError::Validation { .. });
    assert!(engine.queue().is_empty().await.unwrap());
}

#[tokio::test]
async fn test_edit_of_offline_insert_survives_a_failed_pass() {
    let (engine, backend) = offline_engine().await;
    engine
        .perform(EntityTable::Trips, Action::Insert, row(json!({"origin": "A"})))
        .await
        .unwrap();
    let key = engine.cache().entries(EntityTable::Trips).await[0].key.clone();
    engine
        .perform(EntityTable::Trips, Action::Update, row(json!({"id": key, "origin": "B"})))
        .await
        .unwrap();

    backend.fail_when("trips", Action::Update, 503, "service unavailable", |_| true);
    engine.monitor().signal_online();
    let first = engine.on_reconnect().await.unwrap();
    assert_eq!(first, ReplayReport { replayed: 1, failed: 1, ..Default::default() });

    // The queued edit now targets the id the backend assigned
    let backend_id = record_id(&backend.rows("trips")[0]).unwrap();
    let pending = engine.queue().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(record_id(&pending[0].payload), Some(backend_id.clone()));

    // Offline again, the overlay still shows the edit on the backend row
    engine.monitor().signal_offline();
    engine.refresh(EntityTable::Trips).await.unwrap();
    assert_eq!(engine.cache().get(EntityTable::Trips, &backend_id).await.unwrap()["origin"], "B");

    backend.clear_failures();
    engine.monitor().signal_online();
    let second = engine.on_reconnect().await.unwrap();
    assert_eq!(second, ReplayReport { replayed: 1, ..Default::default() });

    let rows = backend.rows("trips");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["origin"], "B");
    assert!(engine.queue().dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_online_write_matches_backend_content() {
    let backend = Arc::new(MemoryBackend::new());
    let engine = engine_with(&AppConfig::default(), backend.clone(), Connectivity::Online).await;

    for date in ["2024-01-01", "2024-03-01", "2024-02-01"] {
        engine
            .perform(EntityTable::Trips, Action::Insert, row(json!({"date": date})))
            .await
            .unwrap();
    }
    let expected = backend
        .select("trips", &[Filter::eq("user_id", USER_ID)], Some(&Order::descending("date")))
        .await
        .unwrap();
    assert_eq!(engine.cache().list(EntityTable::Trips).await, expected);

    let id = record_id(&expected[0]).unwrap();
    engine
        .perform(EntityTable::Trips, Action::Delete, row(json!({"id": id})))
        .await
        .unwrap();
    assert_eq!(engine.cache().len(EntityTable::Trips).await, 2);
}

#[tokio::test]
async fn test_notifications_are_read_by_target_email() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        "notifications",
        vec![
            row(json!({"title": "all drivers", "created_at": "2024-01-01T00:00:00Z"})),
            row(json!({"title": "for ana", "target_user_email": "ana@fleet.test", "created_at": "2024-01-02T00:00:00Z"})),
            row(json!({"title": "for joao", "target_user_email": "joao@fleet.test", "created_at": "2024-01-03T00:00:00Z"})),
        ],
    );
    let engine = engine_with(&AppConfig::default(), backend, Connectivity::Online).await;
    engine.refresh(EntityTable::Notifications).await.unwrap();

    let titles: Vec<_> = engine
        .cache()
        .list(EntityTable::Notifications)
        .await
        .iter()
        .map(|n| n["title"].clone())
        .collect();
    assert_eq!(titles, [json!("for ana"), json!("all drivers")]);
}

/// Backend that loses connectivity on its n-th insert
struct DroppingBackend {
    inner: MemoryBackend,
    monitor: ConnectivityMonitor,
    inserts: AtomicUsize,
    drop_on: usize,
}

#[async_trait]
impl Backend for DroppingBackend {
    async fn select(&self, table: &str, filters: &[Filter], order: Option<&Order>) -> Result<Vec<Record>, BackendError> {
        self.inner.select(table, filters, order).await
    }

    async fn insert(&self, table: &str, record: Record) -> Result<Record, BackendError> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) + 1 == self.drop_on {
            self.monitor.signal_offline();
            return Err(BackendError::Unreachable);
        }
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
async fn test_connectivity_lost_mid_replay_leaves_rest_queued() {
    let monitor = ConnectivityMonitor::new(Connectivity::Offline);
    let backend = Arc::new(DroppingBackend {
        inner: MemoryBackend::new(),
        monitor: monitor.clone(),
        inserts: AtomicUsize::new(0),
        drop_on: 2,
    });
    let db = aurilog_sync::app::local_db::LocalDatabase::in_memory().await.unwrap();
    let engine = Arc::new(aurilog_sync::app::sync::SyncEngine::new(
        &AppConfig::default(),
        crate::common::session(),
        backend.clone(),
        Arc::new(db),
        Arc::new(aurilog_sync::app::cache::ReadModelCache::new()),
        monitor.clone(),
    ));

    for stop in ["first", "second", "third"] {
        engine
            .perform(EntityTable::JornadaLogs, Action::Insert, row(json!({"stop": stop})))
            .await
            .unwrap();
    }

    monitor.signal_online();
    let report = engine.on_reconnect().await.unwrap();
    assert_eq!(report, ReplayReport { replayed: 1, skipped: 2, ..Default::default() });

    let pending = engine.queue().pending().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|op| op.attempts == 0));
    assert_eq!(backend.inner.rows("jornada_logs").len(), 1);
}
