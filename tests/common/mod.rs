//! Common test utilities and helpers
//!
//! Fixtures for building a sync engine over an in-memory database and an
//! in-process backend, plus small polling helpers for event-driven tests.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use aurilog_sync::app::cache::ReadModelCache;
use aurilog_sync::app::local_db::LocalDatabase;
use aurilog_sync::app::remote::{Backend, MemoryBackend};
use aurilog_sync::app::sync::{Connectivity, ConnectivityMonitor, SyncEngine};
use aurilog_sync::shared::{AppConfig, Record, Session};

pub const USER_ID: &str = "driver-1";

/// Build a record from a JSON object literal
pub fn row(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

pub fn session() -> Session {
    Session::new(USER_ID, "ana@fleet.test")
}

/// Engine over a fresh in-memory database
pub async fn engine_with(
    config: &AppConfig,
    backend: Arc<dyn Backend>,
    initial: Connectivity,
) -> Arc<SyncEngine> {
    let db = LocalDatabase::in_memory().await.expect("in-memory database");
    engine_over(config, backend, db, initial)
}

/// Engine over a caller-provided database
pub fn engine_over(
    config: &AppConfig,
    backend: Arc<dyn Backend>,
    db: LocalDatabase,
    initial: Connectivity,
) -> Arc<SyncEngine> {
    Arc::new(SyncEngine::new(
        config,
        session(),
        backend,
        Arc::new(db),
        Arc::new(ReadModelCache::new()),
        ConnectivityMonitor::new(initial),
    ))
}

pub async fn offline_engine() -> (Arc<SyncEngine>, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let engine = engine_with(&AppConfig::default(), backend.clone(), Connectivity::Offline).await;
    (engine, backend)
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
