//! # Network Monitor
//!
//! Tracks whether the device can reach the backend and notifies listeners on
//! every transition. Signals that repeat the current status are absorbed, so
//! each edge is delivered exactly once no matter how noisy the platform
//! source is.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 32;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connectivity status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connectivity::Online => write!(f, "online"),
            Connectivity::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug)]
struct MonitorInner {
    status: Mutex<Connectivity>,
    transitions: broadcast::Sender<Connectivity>,
}

/// Shared connectivity source; clones observe the same status
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (transitions, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                status: Mutex::new(initial),
                transitions,
            }),
        }
    }

    /// Determine the starting status by probing the backend once.
    pub async fn probe(base_url: &str) -> Self {
        Self::new(probe_status(base_url).await)
    }

    pub fn status(&self) -> Connectivity {
        *self.inner.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Report the platform's view of connectivity.
    ///
    /// Returns true when this call changed the status.
    pub fn signal(&self, connectivity: Connectivity) -> bool {
        let mut status = self.inner.status.lock().unwrap_or_else(PoisonError::into_inner);
        if *status == connectivity {
            return false;
        }
        *status = connectivity;
        // Sent under the lock so listeners see edges in the order they happened
        let _ = self.inner.transitions.send(connectivity);
        tracing::info!("[Network] Connectivity changed: {}", connectivity);
        true
    }

    pub fn signal_online(&self) -> bool {
        self.signal(Connectivity::Online)
    }

    pub fn signal_offline(&self) -> bool {
        self.signal(Connectivity::Offline)
    }

    /// Receive every future transition
    pub fn subscribe(&self) -> broadcast::Receiver<Connectivity> {
        self.inner.transitions.subscribe()
    }
}

/// Any HTTP response, even an error status, proves the backend is reachable.
pub async fn probe_status(base_url: &str) -> Connectivity {
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("[Network] Could not build probe client: {}", e);
            return Connectivity::Offline;
        }
    };
    match client.get(format!("{}/rest/v1/", base_url.trim_end_matches('/'))).send().await {
        Ok(_) => Connectivity::Online,
        Err(e) => {
            tracing::info!("[Network] Backend probe failed, starting offline: {}", e);
            Connectivity::Offline
        }
    }
}
