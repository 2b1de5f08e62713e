//! Key-only cache whose entries expire after a fixed time to live.

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `key` or refresh its timestamp.
    pub fn put(&self, key: impl Into<String>) {
        self.entries().insert(key.into(), Instant::now());
    }

    /// Whether `key` was put less than one TTL ago.
    pub fn contains(&self, key: &str) -> bool {
        self.entries()
            .get(key)
            .is_some_and(|inserted| inserted.elapsed() <= self.ttl)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop every expired entry.
    pub fn purge(&self) {
        let ttl = self.ttl;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, inserted| inserted.elapsed() <= ttl);
        if entries.len() != before {
            debug!("Purged {} expired plan cache entries.", before - entries.len());
        }
    }

    /// Purge every `tick` until `shutdown` flips to true.
    pub fn spawn_purge(self: &Arc<Self>, tick: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            let stopped = crate::plugins::wait_for_shutdown(shutdown);
            tokio::pin!(stopped);
            loop {
                tokio::select! {
                    _ = ticker.tick() => cache.purge(),
                    _ = &mut stopped => break,
                }
            }
        })
    }
}
