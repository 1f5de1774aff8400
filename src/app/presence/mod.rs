//! # Realtime Presence
//!
//! Keeps the last known location of every driver and the driver roster up to
//! date from backend change events.
//!
//! - Presence inserts and updates are upserted by email; the last delivered
//!   event wins
//! - Any roster change triggers a full roster re-read
//! - Liveness is derived when read, from the wall clock at that moment
//!
//! Events flow over an mpsc channel into one task per subscription, so
//! backend delivery never touches tracker state directly.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::app::remote::{Backend, SubscriptionHandle};
use crate::shared::error::Result;
use crate::shared::event::{ChangeEvent, ChangeKind, EventMask};
use crate::shared::models::{Driver, Order, PresenceRecord, PRESENCE_TABLE, ROSTER_TABLE};

/// Roster entry joined with its presence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverStatus {
    pub driver: Driver,
    pub presence: Option<PresenceRecord>,
    pub online: bool,
}

#[derive(Debug, Default)]
struct PresenceState {
    presence: Vec<PresenceRecord>,
    roster: Vec<Driver>,
}

struct TrackerInner {
    backend: Arc<dyn Backend>,
    window: Duration,
    state: RwLock<PresenceState>,
}

/// Presence and roster view shared by the admin screens
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<TrackerInner>,
}

impl PresenceTracker {
    pub fn new(backend: Arc<dyn Backend>, window: Duration) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                backend,
                window,
                state: RwLock::new(PresenceState::default()),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Subscribe to both tables, load both snapshots and start the event task.
    ///
    /// Events delivered while the snapshots load wait in the channel and are
    /// applied on top of them once the task starts.
    pub async fn start(&self) -> Result<PresenceSubscription> {
        let (sink, mut events) = mpsc::unbounded_channel::<ChangeEvent>();
        let backend = &self.inner.backend;
        let presence_handle = backend.subscribe(PRESENCE_TABLE, EventMask::UPSERTS, sink.clone()).await?;
        let roster_handle = match backend.subscribe(ROSTER_TABLE, EventMask::ALL, sink).await {
            Ok(handle) => handle,
            Err(error) => {
                let _ = backend.unsubscribe(presence_handle).await;
                return Err(error.into());
            }
        };
        let handles = vec![presence_handle, roster_handle];

        if let Err(error) = self.load_snapshots().await {
            for handle in handles {
                let _ = backend.unsubscribe(handle).await;
            }
            return Err(error);
        }

        let tracker = self.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(error) = tracker.apply_event(event).await {
                    tracing::warn!("[Presence] Failed to apply change event: {}", error);
                }
            }
            tracing::debug!("[Presence] Event channel closed");
        });

        tracing::info!("[Presence] Tracking {} and {}", PRESENCE_TABLE, ROSTER_TABLE);
        Ok(PresenceSubscription {
            backend: Arc::clone(&self.inner.backend),
            handles,
            task: Some(task),
        })
    }

    /// Apply one change event to tracker state.
    pub async fn apply_event(&self, event: ChangeEvent) -> Result<()> {
        match event.table.as_str() {
            PRESENCE_TABLE => {
                if !matches!(event.kind, ChangeKind::Insert | ChangeKind::Update) {
                    return Ok(());
                }
                let Some(record) = &event.record else {
                    return Ok(());
                };
                self.upsert(PresenceRecord::from_record(record)?).await;
                Ok(())
            }
            ROSTER_TABLE => self.reload_roster().await,
            other => {
                tracing::debug!("[Presence] Ignoring event for {}", other);
                Ok(())
            }
        }
    }

    /// Replace the record with the same email or append a new one.
    pub async fn upsert(&self, record: PresenceRecord) {
        let mut state = self.inner.state.write().await;
        match state.presence.iter_mut().find(|existing| existing.email == record.email) {
            Some(existing) => *existing = record,
            None => state.presence.push(record),
        }
    }

    async fn load_snapshots(&self) -> Result<()> {
        self.reload_presence().await?;
        self.reload_roster().await
    }

    async fn reload_presence(&self) -> Result<()> {
        let rows = self.inner.backend.select(PRESENCE_TABLE, &[], None).await?;
        let presence: Vec<PresenceRecord> = rows
            .iter()
            .filter_map(|row| match PresenceRecord::from_record(row) {
                Ok(record) => Some(record),
                Err(error) => {
                    tracing::warn!("[Presence] Skipping unreadable presence row: {}", error);
                    None
                }
            })
            .collect();
        self.inner.state.write().await.presence = presence;
        Ok(())
    }

    /// Re-read the whole roster.
    pub async fn reload_roster(&self) -> Result<()> {
        let rows = self
            .inner
            .backend
            .select(ROSTER_TABLE, &[], Some(&Order::ascending("full_name")))
            .await?;
        let roster: Vec<Driver> = rows
            .iter()
            .filter_map(|row| Driver::from_record(row).ok())
            .collect();
        tracing::debug!("[Presence] Roster reloaded ({} drivers)", roster.len());
        self.inner.state.write().await.roster = roster;
        Ok(())
    }

    pub async fn presence(&self) -> Vec<PresenceRecord> {
        self.inner.state.read().await.presence.clone()
    }

    pub async fn roster(&self) -> Vec<Driver> {
        self.inner.state.read().await.roster.clone()
    }

    pub async fn presence_for(&self, email: &str) -> Option<PresenceRecord> {
        let state = self.inner.state.read().await;
        state.presence.iter().find(|record| record.email == email).cloned()
    }

    /// Whether the driver pinged within the liveness window before `now`
    pub async fn is_online(&self, email: &str, now: DateTime<Utc>) -> bool {
        self.presence_for(email)
            .await
            .is_some_and(|record| record.is_online_at(now, self.inner.window))
    }

    /// Roster joined with presence, in roster order
    pub async fn drivers_with_presence(&self, now: DateTime<Utc>) -> Vec<DriverStatus> {
        let state = self.inner.state.read().await;
        state
            .roster
            .iter()
            .map(|driver| {
                let presence = state.presence.iter().find(|p| p.email == driver.email).cloned();
                let online = presence
                    .as_ref()
                    .is_some_and(|p| p.is_online_at(now, self.inner.window));
                DriverStatus { driver: driver.clone(), presence, online }
            })
            .collect()
    }

    pub async fn online_count(&self, now: DateTime<Utc>) -> usize {
        self.drivers_with_presence(now)
            .await
            .iter()
            .filter(|status| status.online)
            .count()
    }
}

/// Live presence subscription; release it when the view goes away
pub struct PresenceSubscription {
    backend: Arc<dyn Backend>,
    handles: Vec<SubscriptionHandle>,
    task: Option<JoinHandle<()>>,
}

impl PresenceSubscription {
    /// Unsubscribe both tables and stop the event task.
    pub async fn stop(mut self) -> Result<()> {
        for handle in std::mem::take(&mut self.handles) {
            self.backend.unsubscribe(handle).await?;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        tracing::info!("[Presence] Subscription released");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PresenceSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            // Dropping the receiver closes the sinks; the backend prunes them
            task.abort();
        }
    }
}
