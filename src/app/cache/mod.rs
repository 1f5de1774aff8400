//! # Read-Model Cache
//!
//! In-memory per-entity collections the UI renders from. Refresh is always a
//! full replace of one collection from its authoritative source: the backend
//! when online, the local snapshot plus queued operations when offline.
//! There is no incremental merge. Order is preserved exactly as handed in.
//!
//! Every replace bumps a version published on a `watch` channel so views can
//! re-render.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{watch, RwLock};

use crate::shared::models::{record_id, EntityTable, Record};

/// Key prefix for records created offline that have no backend id yet.
pub const PROVISIONAL_KEY_PREFIX: &str = "local-";

/// Key for the record a queued insert will create
pub fn provisional_key(seq: i64) -> String {
    format!("{}{}", PROVISIONAL_KEY_PREFIX, seq)
}

/// A record together with the key the cache indexes it by
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub record: Record,
}

impl CacheEntry {
    /// Key a backend row by its id, falling back to its position.
    pub fn from_backend(record: Record, position: usize) -> Self {
        let key = record_id(&record).unwrap_or_else(|| format!("row-{}", position));
        Self { key, record }
    }

    /// Whether this entry only exists locally, pending replay.
    pub fn is_provisional(&self) -> bool {
        self.key.starts_with(PROVISIONAL_KEY_PREFIX)
    }
}

/// Where a collection's current content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheSource {
    Backend,
    Local,
}

#[derive(Debug, Default)]
struct Collection {
    entries: Vec<CacheEntry>,
    index: HashMap<String, usize>,
    source: Option<CacheSource>,
}

impl Collection {
    fn replace(&mut self, entries: Vec<CacheEntry>, source: CacheSource) {
        self.index = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.key.clone(), position))
            .collect();
        self.entries = entries;
        self.source = Some(source);
    }
}

/// Per-entity read model
#[derive(Debug)]
pub struct ReadModelCache {
    collections: RwLock<HashMap<EntityTable, Collection>>,
    version: watch::Sender<u64>,
}

impl ReadModelCache {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            collections: RwLock::new(HashMap::new()),
            version,
        }
    }

    /// Replace a whole collection
    pub async fn replace_all(&self, table: EntityTable, entries: Vec<CacheEntry>, source: CacheSource) {
        let count = entries.len();
        {
            let mut collections = self.collections.write().await;
            collections.entry(table).or_default().replace(entries, source);
        }
        self.version.send_modify(|version| *version += 1);
        tracing::debug!("[Cache] {} refreshed from {:?} ({} records)", table, source, count);
    }

    /// Records of a collection in display order
    pub async fn list(&self, table: EntityTable) -> Vec<Record> {
        let collections = self.collections.read().await;
        collections
            .get(&table)
            .map(|collection| collection.entries.iter().map(|entry| entry.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Entries of a collection in display order, with their keys
    pub async fn entries(&self, table: EntityTable) -> Vec<CacheEntry> {
        let collections = self.collections.read().await;
        collections
            .get(&table)
            .map(|collection| collection.entries.clone())
            .unwrap_or_default()
    }

    /// Look up one record by key
    pub async fn get(&self, table: EntityTable, key: &str) -> Option<Record> {
        let collections = self.collections.read().await;
        let collection = collections.get(&table)?;
        let position = *collection.index.get(key)?;
        collection.entries.get(position).map(|entry| entry.record.clone())
    }

    pub async fn len(&self, table: EntityTable) -> usize {
        let collections = self.collections.read().await;
        collections.get(&table).map(|c| c.entries.len()).unwrap_or(0)
    }

    /// Source of the last refresh, `None` if never loaded
    pub async fn source(&self, table: EntityTable) -> Option<CacheSource> {
        let collections = self.collections.read().await;
        collections.get(&table).and_then(|c| c.source)
    }

    /// Receiver that changes whenever any collection is replaced
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Drop every collection (sign-out)
    pub async fn clear(&self) {
        self.collections.write().await.clear();
        self.version.send_modify(|version| *version += 1);
    }
}

impl Default for ReadModelCache {
    fn default() -> Self {
        Self::new()
    }
}
