//! # Sync Context
//!
//! Owns every service of the sync layer for one signed-in session and ties
//! their lifetime to application start and stop. Views receive the context
//! (or the pieces they need) instead of reaching for globals.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::app::cache::ReadModelCache;
use crate::app::local_db::LocalDatabase;
use crate::app::presence::{PresenceSubscription, PresenceTracker};
use crate::app::remote::Backend;
use crate::app::sync::{Connectivity, ConnectivityMonitor, SyncEngine};
use crate::shared::config::AppConfig;
use crate::shared::error::Result;
use crate::shared::models::Session;

pub struct SyncContext {
    config: AppConfig,
    db: Arc<LocalDatabase>,
    engine: Arc<SyncEngine>,
    presence: PresenceTracker,
    listener: Option<JoinHandle<()>>,
}

impl SyncContext {
    /// Open the local database named by the config and start the services.
    pub async fn init(
        config: AppConfig,
        session: Session,
        backend: Arc<dyn Backend>,
        initial: Connectivity,
    ) -> Result<Self> {
        let path = config.db_path.clone().unwrap_or_else(LocalDatabase::default_path);
        let db = LocalDatabase::open(&path).await?;
        Self::init_with_db(config, session, backend, db, initial).await
    }

    /// Start the services over an already opened database.
    pub async fn init_with_db(
        config: AppConfig,
        session: Session,
        backend: Arc<dyn Backend>,
        db: LocalDatabase,
        initial: Connectivity,
    ) -> Result<Self> {
        let db = Arc::new(db);
        let cache = Arc::new(ReadModelCache::new());
        let monitor = ConnectivityMonitor::new(initial);

        let engine = Arc::new(SyncEngine::new(
            &config,
            session,
            Arc::clone(&backend),
            Arc::clone(&db),
            cache,
            monitor,
        ));
        let listener = engine.spawn_connectivity_listener();
        let presence = PresenceTracker::new(backend, config.liveness_window_chrono());

        // Operations left over from a previous run go out first
        if initial.is_online() {
            engine.on_reconnect().await?;
        } else {
            engine.refresh_all().await;
        }

        tracing::info!("[Context] Sync context ready ({})", initial);
        Ok(Self {
            config,
            db,
            engine,
            presence,
            listener: Some(listener),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<ReadModelCache> {
        self.engine.cache()
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        self.engine.monitor()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Begin realtime presence tracking for an admin view.
    pub async fn start_presence(&self) -> Result<PresenceSubscription> {
        self.presence.start().await
    }

    /// Stop background work and close the database.
    pub async fn shutdown(mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.engine.cache().clear().await;
        self.db.close().await;
        tracing::info!("[Context] Sync context shut down");
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
