//! # Sync Engine
//!
//! Routes every write either straight to the backend or into the offline
//! queue, replays the queue when connectivity returns, and rebuilds the read
//! model afterwards.
//!
//! ## Write path
//!
//! - **Online**: the mutation goes to the backend scoped by record id and the
//!   session owner, then the affected collection is re-read in full
//! - **Offline**: the mutation is queued durably and the collection is rebuilt
//!   from the local snapshot overlaid with queued operations
//!
//! Mutations, replays and refreshes share one async gate, so a caller never
//! observes the state between a write and its refresh.
//!
//! ## Reconnect
//!
//! On every OFFLINE→ONLINE edge the queue is replayed oldest first. A failing
//! item does not stop the ones after it; the failure is counted and the item
//! stays queued until the replay policy parks it. Every reconnect ends with a
//! full refresh of all collections.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aurilog_sync::app::sync::{PerformOutcome, SyncEngine};
//! use aurilog_sync::shared::models::{Action, EntityTable};
//! use serde_json::json;
//!
//! # async fn example(engine: std::sync::Arc<SyncEngine>) -> aurilog_sync::shared::error::Result<()> {
//! let trip = json!({"origin": "Campinas", "destination": "Santos"});
//! match engine.perform(EntityTable::Trips, Action::Insert, trip.as_object().cloned().unwrap()).await? {
//!     PerformOutcome::Applied(record) => println!("saved {:?}", record),
//!     PerformOutcome::Queued(op) => println!("queued as #{}", op.seq),
//! }
//! # Ok(())
//! # }
//! ```

pub mod network_monitor;
pub mod sync_state;

use futures_util::TryStreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::app::cache::{provisional_key, CacheEntry, CacheSource, ReadModelCache};
use crate::app::local_db::LocalDatabase;
use crate::app::offline::{OfflineQueue, PendingOperation, ReplayDecision, ReplayPolicy};
use crate::app::remote::{Backend, Filter};
use crate::shared::config::AppConfig;
use crate::shared::error::{Result, SyncError};
use crate::shared::models::{
    record_id, Action, EntityTable, Record, Session, ID_FIELD, OWNER_FIELD, TARGET_EMAIL_FIELD,
};

pub use network_monitor::{Connectivity, ConnectivityMonitor};
pub use sync_state::{ReplayReport, SyncStatus};

/// Result of a successful `perform`
#[derive(Debug, Clone, PartialEq)]
pub enum PerformOutcome {
    /// Applied to the backend; the stored row for inserts and updates
    Applied(Option<Record>),
    /// Queued for replay on reconnect
    Queued(PendingOperation),
}

impl PerformOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, PerformOutcome::Queued(_))
    }
}

/// Orchestrates writes, replay and read-model refresh for one session
pub struct SyncEngine {
    session: Session,
    backend: Arc<dyn Backend>,
    db: Arc<LocalDatabase>,
    queue: OfflineQueue,
    cache: Arc<ReadModelCache>,
    monitor: ConnectivityMonitor,
    policy: ReplayPolicy,
    reconnect_debounce: Duration,
    gate: Mutex<()>,
    status: RwLock<SyncStatus>,
}

impl SyncEngine {
    pub fn new(
        config: &AppConfig,
        session: Session,
        backend: Arc<dyn Backend>,
        db: Arc<LocalDatabase>,
        cache: Arc<ReadModelCache>,
        monitor: ConnectivityMonitor,
    ) -> Self {
        let queue = OfflineQueue::new(Arc::clone(&db)).with_max_len(config.max_queue_len);
        Self {
            session,
            backend,
            db,
            queue,
            cache,
            monitor,
            policy: ReplayPolicy::new(config.max_replay_attempts),
            reconnect_debounce: config.reconnect_debounce,
            gate: Mutex::new(()),
            status: RwLock::new(SyncStatus::default()),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn cache(&self) -> &Arc<ReadModelCache> {
        &self.cache
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Apply or queue one mutation, then refresh the affected collection.
    ///
    /// Backend and storage failures are returned as-is; nothing is retried.
    pub async fn perform(&self, table: EntityTable, action: Action, payload: Record) -> Result<PerformOutcome> {
        let payload = self.prepare(table, action, payload)?;
        let _gate = self.gate.lock().await;

        if !self.monitor.is_online() {
            let operation = self.queue.enqueue(table, payload, action).await?;
            self.refresh_from_local(table).await?;
            tracing::info!("[Sync] Offline: queued {} on {} as #{}", action, table, operation.seq);
            return Ok(PerformOutcome::Queued(operation));
        }

        let target = record_id(&payload);
        let applied = match self.apply_remote(table, action, payload).await {
            Ok(applied) => applied,
            Err(error) => {
                tracing::warn!("[Sync] {} on {} rejected: {}", action, table, error);
                self.status.write().await.push_error(error.user_message());
                return Err(error);
            }
        };
        tracing::info!("[Sync] Applied {} on {}", action, table);

        // The write is committed; a failed re-read must not report it as lost
        if let Err(error) = self.refresh_from_backend(table).await {
            tracing::warn!("[Sync] Refresh of {} after {} failed, using local copy: {}", table, action, error);
            self.status.write().await.push_error(error.user_message());
            if let Err(error) = self.mirror_locally(table, action, target.as_deref(), applied.as_ref()).await {
                tracing::error!("[Sync] Local refresh of {} failed: {}", table, error);
            }
        }
        Ok(PerformOutcome::Applied(applied))
    }

    /// Copy an applied mutation into the local snapshot and rebuild from it.
    async fn mirror_locally(
        &self,
        table: EntityTable,
        action: Action,
        target: Option<&str>,
        applied: Option<&Record>,
    ) -> Result<()> {
        match (action, applied) {
            (Action::Delete, _) => {
                if let Some(id) = target {
                    self.db.delete_local_record(table, id).await?;
                }
            }
            (_, Some(record)) => {
                if let Some(key) = record_id(record) {
                    self.db.put_local_record(table, &key, record).await?;
                }
            }
            (_, None) => {}
        }
        self.refresh_from_local(table).await
    }

    /// Validate a payload and stamp the session owner onto it.
    ///
    /// A payload naming any other owner is refused.
    fn prepare(&self, table: EntityTable, action: Action, mut payload: Record) -> Result<Record> {
        if self.session.user_id.trim().is_empty() {
            return Err(SyncError::validation(OWNER_FIELD, "no signed-in user"));
        }
        match payload.get(OWNER_FIELD) {
            None | Some(Value::Null) => {
                payload.insert(OWNER_FIELD.to_string(), Value::String(self.session.user_id.clone()));
            }
            Some(Value::String(owner)) if *owner == self.session.user_id => {}
            Some(_) => {
                return Err(SyncError::validation(
                    OWNER_FIELD,
                    format!("{} on {} must belong to the signed-in user", action, table),
                ));
            }
        }

        match action {
            Action::Insert => Ok(payload),
            Action::Update | Action::Delete => {
                let id = record_id(&payload).ok_or_else(|| {
                    SyncError::validation(ID_FIELD, format!("{} on {} needs a record id", action, table))
                })?;
                if action == Action::Delete {
                    let mut key = Record::new();
                    key.insert(ID_FIELD.to_string(), Value::String(id));
                    key.insert(OWNER_FIELD.to_string(), Value::String(self.session.user_id.clone()));
                    return Ok(key);
                }
                Ok(payload)
            }
        }
    }

    /// Send one mutation, always scoped by the session owner.
    ///
    /// Inserts are stamped with the owner and update patches never carry it,
    /// so no write can hand a row to another account.
    async fn apply_remote(&self, table: EntityTable, action: Action, mut payload: Record) -> Result<Option<Record>> {
        let owner = self.session.user_id.as_str();
        match action {
            Action::Insert => {
                payload.insert(OWNER_FIELD.to_string(), Value::String(owner.to_string()));
                Ok(Some(self.backend.insert(table.as_str(), payload).await?))
            }
            Action::Update => {
                let id = record_id(&payload)
                    .ok_or_else(|| SyncError::validation(ID_FIELD, "update needs a record id"))?;
                payload.remove(ID_FIELD);
                payload.remove(OWNER_FIELD);
                Ok(Some(self.backend.update(table.as_str(), &id, owner, payload).await?))
            }
            Action::Delete => {
                let id = record_id(&payload)
                    .ok_or_else(|| SyncError::validation(ID_FIELD, "delete needs a record id"))?;
                self.backend.delete(table.as_str(), &id, owner).await?;
                Ok(None)
            }
        }
    }

    /// Replay every queued operation, oldest first.
    pub async fn replay_pending(&self) -> Result<ReplayReport> {
        let _gate = self.gate.lock().await;
        self.replay_locked().await
    }

    /// Replay the queue and then re-read every collection.
    pub async fn on_reconnect(&self) -> Result<ReplayReport> {
        let _gate = self.gate.lock().await;
        let report = self.replay_locked().await?;
        self.refresh_all_locked().await;
        Ok(report)
    }

    async fn replay_locked(&self) -> Result<ReplayReport> {
        self.status.write().await.is_syncing = true;
        let result = self.replay_queue().await;

        let mut status = self.status.write().await;
        status.is_syncing = false;
        match &result {
            Ok(report) => {
                status.last_replay = Some(*report);
                if report.attempted() > 0 || report.skipped > 0 {
                    tracing::info!(
                        "[Sync] Replay finished: {} replayed, {} failed, {} dead-lettered, {} skipped",
                        report.replayed,
                        report.failed,
                        report.dead_lettered,
                        report.skipped
                    );
                }
            }
            Err(error) => {
                tracing::error!("[Sync] Replay aborted: {}", error);
                status.push_error(error.user_message());
            }
        }
        result
    }

    async fn replay_queue(&self) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        let mut stopped_at = None;

        {
            let mut pending = self.queue.drain();
            while let Some(operation) = pending.try_next().await? {
                if !self.monitor.is_online() {
                    stopped_at = Some(operation.seq);
                    break;
                }

                let error = match self.replay_one(&operation).await {
                    Ok(applied) => {
                        self.settle(&operation, applied.as_ref()).await?;
                        report.replayed += 1;
                        continue;
                    }
                    Err(error) if error.is_transient() && !self.monitor.is_online() => SyncError::ConnectivityRace,
                    Err(error) => error,
                };

                match self.policy.decide(operation.attempts, &error) {
                    ReplayDecision::Skip => {
                        tracing::info!("[Sync] Went offline while replaying #{}", operation.seq);
                        stopped_at = Some(operation.seq);
                        break;
                    }
                    ReplayDecision::Retain => {
                        let attempts = self.queue.record_failure(operation.seq, &error).await?;
                        tracing::warn!(
                            "[Sync] Replay of #{} ({} on {}) failed, attempt {}: {}",
                            operation.seq,
                            operation.action,
                            operation.table,
                            attempts,
                            error
                        );
                        report.failed += 1;
                    }
                    ReplayDecision::DeadLetter => {
                        self.queue.record_failure(operation.seq, &error).await?;
                        self.queue.dead_letter(operation.seq, &error).await?;
                        report.dead_lettered += 1;
                    }
                }
            }
        }

        if let Some(seq) = stopped_at {
            report.skipped = self.queue.pending().await?.iter().filter(|op| op.seq >= seq).count();
        }
        Ok(report)
    }

    async fn replay_one(&self, operation: &PendingOperation) -> Result<Option<Record>> {
        let applied = self
            .apply_remote(operation.table, operation.action, operation.payload.clone())
            .await?;
        tracing::debug!("[Sync] Replayed #{} ({} on {})", operation.seq, operation.action, operation.table);
        Ok(applied)
    }

    /// Take a replayed operation off the queue.
    ///
    /// A replayed insert hands its backend id to every later queued operation
    /// that still addresses it by provisional key, so the mapping survives a
    /// failed pass or a restart.
    async fn settle(&self, operation: &PendingOperation, applied: Option<&Record>) -> Result<()> {
        match applied.and_then(record_id) {
            Some(backend_id) if operation.action == Action::Insert => {
                self.queue
                    .complete_insert(operation.seq, &provisional_key(operation.seq), &backend_id)
                    .await
            }
            _ => self.queue.remove_one(operation.seq).await.map(|_| ()),
        }
    }

    /// Rebuild one collection from its authoritative source.
    pub async fn refresh(&self, table: EntityTable) -> Result<CacheSource> {
        let _gate = self.gate.lock().await;
        if self.monitor.is_online() {
            self.refresh_from_backend(table).await?;
            Ok(CacheSource::Backend)
        } else {
            self.refresh_from_local(table).await?;
            Ok(CacheSource::Local)
        }
    }

    /// Rebuild every collection; used for the first render and after reconnect.
    pub async fn refresh_all(&self) {
        let _gate = self.gate.lock().await;
        self.refresh_all_locked().await;
    }

    async fn refresh_all_locked(&self) {
        for table in EntityTable::ALL {
            if self.monitor.is_online() {
                match self.refresh_from_backend(table).await {
                    Ok(()) => continue,
                    Err(error) => {
                        tracing::warn!("[Sync] Refresh of {} from backend failed, using local copy: {}", table, error);
                        self.status.write().await.push_error(error.user_message());
                    }
                }
            }
            if let Err(error) = self.refresh_from_local(table).await {
                tracing::error!("[Sync] Local refresh of {} failed: {}", table, error);
                self.status.write().await.push_error(error.user_message());
            }
        }
    }

    /// Filters that scope reads to what the session may see
    fn read_filters(&self, table: EntityTable) -> Vec<Filter> {
        if table.is_broadcast() {
            vec![Filter::eq_or_null(TARGET_EMAIL_FIELD, self.session.email.as_str())]
        } else {
            vec![Filter::eq(OWNER_FIELD, self.session.user_id.as_str())]
        }
    }

    async fn refresh_from_backend(&self, table: EntityTable) -> Result<()> {
        let rows = self
            .backend
            .select(table.as_str(), &self.read_filters(table), Some(&table.default_order()))
            .await?;
        let entries: Vec<CacheEntry> = rows
            .into_iter()
            .enumerate()
            .map(|(position, record)| CacheEntry::from_backend(record, position))
            .collect();

        self.db.replace_local_records(table, &entries).await?;
        self.cache.replace_all(table, entries, CacheSource::Backend).await;
        self.status.write().await.last_sync = Some(chrono::Utc::now());
        Ok(())
    }

    async fn refresh_from_local(&self, table: EntityTable) -> Result<()> {
        let snapshot = self.db.local_records(table).await?;
        let pending = self.queue.pending_for(table).await?;
        self.cache
            .replace_all(table, overlay_pending(snapshot, &pending), CacheSource::Local)
            .await;
        Ok(())
    }

    /// React to connectivity edges until the task is aborted.
    ///
    /// The subscription is taken before spawning so an edge signalled right
    /// after this call is not missed.
    pub fn spawn_connectivity_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut transitions = self.monitor.subscribe();
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                match transitions.recv().await {
                    Ok(Connectivity::Online) => engine.handle_online_edge().await,
                    Ok(Connectivity::Offline) => {
                        tracing::info!("[Sync] Offline; writes will be queued");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("[Sync] Missed {} connectivity edges", skipped);
                        if engine.monitor.is_online() {
                            engine.handle_online_edge().await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_online_edge(&self) {
        if !self.reconnect_debounce.is_zero() {
            tokio::time::sleep(self.reconnect_debounce).await;
            if !self.monitor.is_online() {
                tracing::debug!("[Sync] Connection dropped again before replay");
                return;
            }
        }
        tracing::info!("[Sync] Online; replaying queued operations");
        if let Err(error) = self.on_reconnect().await {
            tracing::error!("[Sync] Reconnect sequence failed: {}", error);
        }
    }

    /// Snapshot for status displays
    pub async fn status(&self) -> Result<SyncStatus> {
        let mut status = self.status.read().await.clone();
        status.online = self.monitor.is_online();
        status.pending_operations = self.queue.len().await?;
        status.dead_letters = self.queue.dead_letters().await?.len();
        Ok(status)
    }
}

/// Apply queued operations, oldest first, on top of a local snapshot.
///
/// Inserts without an id appear under their provisional key so later
/// queued updates and deletes can address them.
pub fn overlay_pending(mut entries: Vec<CacheEntry>, pending: &[PendingOperation]) -> Vec<CacheEntry> {
    for operation in pending {
        match operation.action {
            Action::Insert => {
                let mut record = operation.payload.clone();
                let key = record_id(&record).unwrap_or_else(|| {
                    let key = provisional_key(operation.seq);
                    record.insert(ID_FIELD.to_string(), Value::String(key.clone()));
                    key
                });
                match entries.iter_mut().find(|entry| entry.key == key) {
                    Some(entry) => entry.record = record,
                    None => entries.push(CacheEntry { key, record }),
                }
            }
            Action::Update => {
                let Some(id) = record_id(&operation.payload) else {
                    continue;
                };
                if let Some(entry) = entries.iter_mut().find(|entry| entry.key == id) {
                    for (field, value) in &operation.payload {
                        if field != ID_FIELD {
                            entry.record.insert(field.clone(), value.clone());
                        }
                    }
                }
            }
            Action::Delete => {
                if let Some(id) = record_id(&operation.payload) {
                    entries.retain(|entry| entry.key != id);
                }
            }
        }
    }
    entries
}
