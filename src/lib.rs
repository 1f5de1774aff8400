//! AuriLog Sync - Main Library
//!
//! Offline-first data synchronization for the AuriLog fleet app. Writes made
//! without connectivity are queued durably and replayed in order when the
//! device comes back online; the read model is always rebuilt in full from
//! its authoritative source; driver presence is tracked from realtime change
//! events.
//!
//! # Module Structure
//!
//! - **`shared`** - Platform-agnostic types
//!   - Entity tables, actions, presence and roster records
//!   - Realtime change events
//!   - Error taxonomy and configuration
//!
//! - **`app`** - Client runtime
//!   - Local SQLite storage and the offline queue
//!   - Backend boundary with REST/SSE and in-memory implementations
//!   - Sync engine, connectivity monitor, read-model cache
//!   - Presence tracker and the owning `SyncContext`
//!
//! # Usage
//!
//! ```rust,no_run
//! use aurilog_sync::app::context::SyncContext;
//! use aurilog_sync::app::remote::RestBackend;
//! use aurilog_sync::app::sync::Connectivity;
//! use aurilog_sync::shared::{AppConfig, Session};
//! use std::sync::Arc;
//!
//! # async fn example() -> aurilog_sync::shared::error::Result<()> {
//! let config = AppConfig::default();
//! let backend = Arc::new(RestBackend::new(config.backend_url.clone(), config.api_key.clone()));
//! let session = Session::new("7f1c", "ana@fleet.test");
//!
//! let context = SyncContext::init(config, session, backend, Connectivity::Online).await?;
//! context.monitor().signal_offline();
//! // writes now queue; signal_online() replays them
//! context.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Services are shared through `Arc`; mutable state sits behind tokio
//! `RwLock`/`Mutex`. Connectivity edges use a `broadcast` channel and
//! realtime events an `mpsc` channel.

/// Shared types and data structures
pub mod shared;

/// Client runtime: storage, sync, presence
pub mod app;
