//! Client Runtime Module
//!
//! The offline-first sync layer that sits between the AuriLog screens and
//! the hosted backend.
//!
//! # Architecture
//!
//! - **`config`** - TOML file + environment configuration
//! - **`local_db`** - SQLite storage that survives restarts
//! - **`offline`** - durable operation queue and replay policy
//! - **`remote`** - backend boundary (REST + realtime, in-memory)
//! - **`sync`** - connectivity monitor and the sync engine
//! - **`cache`** - read model the screens render from
//! - **`presence`** - realtime driver presence and roster
//! - **`context`** - owns all of the above for one session
//!
//! # Module Structure
//!
//! ```text
//! app/
//! ├── main.rs      - Headless sync agent (binary)
//! ├── config.rs    - Configuration loading
//! ├── context.rs   - Service lifecycle
//! ├── cache/       - Read-model cache
//! ├── local_db/    - SQLite schema, queue rows, record snapshots
//! ├── offline/     - OfflineQueue, ReplayPolicy
//! ├── presence/    - PresenceTracker
//! ├── remote/      - Backend trait, RestBackend, MemoryBackend, SSE framing
//! └── sync/        - SyncEngine, ConnectivityMonitor, SyncStatus
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod local_db;
pub mod offline;
pub mod presence;
pub mod remote;
pub mod sync;

pub use cache::ReadModelCache;
pub use context::SyncContext;
pub use sync::SyncEngine;
