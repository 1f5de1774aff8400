//! Queued operations survive a process restart

use serde_json::json;
use std::sync::Arc;

use aurilog_sync::app::local_db::LocalDatabase;
use aurilog_sync::app::remote::MemoryBackend;
use aurilog_sync::app::sync::Connectivity;
use aurilog_sync::shared::models::{Action, EntityTable};
use aurilog_sync::shared::AppConfig;

use crate::common::{engine_over, row};

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.db");
    let backend = Arc::new(MemoryBackend::new());

    {
        let db = LocalDatabase::open(&path).await.unwrap();
        let engine = engine_over(&AppConfig::default(), backend.clone(), db.clone(), Connectivity::Offline);
        for origin in ["Campinas", "Santos"] {
            engine
                .perform(EntityTable::Trips, Action::Insert, row(json!({"origin": origin})))
                .await
                .unwrap();
        }
        db.close().await;
    }

    let db = LocalDatabase::open(&path).await.unwrap();
    let engine = engine_over(&AppConfig::default(), backend.clone(), db, Connectivity::Offline);

    // The offline read model is rebuilt from the persisted queue
    engine.refresh(EntityTable::Trips).await.unwrap();
    assert_eq!(engine.cache().len(EntityTable::Trips).await, 2);

    engine.monitor().signal_online();
    let report = engine.on_reconnect().await.unwrap();
    assert_eq!(report.replayed, 2);

    let origins: Vec<_> = backend.applied().iter().map(|m| m.record["origin"].clone()).collect();
    assert_eq!(origins, [json!("Campinas"), json!("Santos")]);
}

#[tokio::test]
async fn test_snapshot_serves_offline_reads_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.db");
    let backend = Arc::new(MemoryBackend::new());
    backend.seed("vehicles", vec![row(json!({"id": "v1", "user_id": crate::common::USER_ID, "plate": "ABC1D23"}))]);

    {
        let db = LocalDatabase::open(&path).await.unwrap();
        let engine = engine_over(&AppConfig::default(), backend.clone(), db.clone(), Connectivity::Online);
        engine.refresh(EntityTable::Vehicles).await.unwrap();
        db.close().await;
    }

    let db = LocalDatabase::open(&path).await.unwrap();
    let engine = engine_over(&AppConfig::default(), backend, db, Connectivity::Offline);
    engine.refresh(EntityTable::Vehicles).await.unwrap();

    let vehicles = engine.cache().list(EntityTable::Vehicles).await;
    assert_eq!(vehicles.len(), 1);
    assert_eq!(vehicles[0]["plate"], "ABC1D23");
}
