//! Idempotency response cache.
//!
//! Maps client-supplied idempotency keys to the response produced the first
//! time the request completed, so a retried submission returns the original
//! outcome instead of acting again. The cache stores a response, not a lock:
//! two racing first submissions both execute and the later completion wins.
//! A background sweeper evicts entries past the retention window to bound
//! memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default retention for cached responses.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
struct Entry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

/// Keyed response cache with time-based expiry.
///
/// Readers proceed concurrently; `set` and the sweeper take the write lock
/// briefly. A reader observes either the pre- or post-state of any `set`,
/// never a torn value.
#[derive(Debug)]
pub struct IdempotencyStore<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    retention: chrono::Duration,
}

impl<V> IdempotencyStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Store evicting entries older than `retention`.
    pub fn new(retention: Duration) -> Self {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        Self { entries: RwLock::new(HashMap::new()), retention }
    }

    /// Cached response for `key`, if present and not yet swept.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.entries.read().await.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or overwrite the response for `key`.
    pub async fn set(&self, key: impl Into<String>, value: V) {
        let entry = Entry { value, inserted_at: Utc::now() };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove entries older than the retention window as of `now`; returns
    /// the eviction count. Holds the write lock for the scan.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        // an unrepresentable cutoff means nothing can have aged out
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return 0;
        };
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at >= cutoff);
        before - entries.len()
    }

    /// Spawn the periodic sweeper; it stops when `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick completes immediately; skip it
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = store.sweep_expired(Utc::now()).await;
                        if evicted > 0 {
                            debug!(evicted, "idempotency sweep removed expired entries");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("idempotency sweeper stopped");
                        break;
                    }
                }
            }
        })
    }
}
