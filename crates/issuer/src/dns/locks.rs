//! Per-record serialization of challenge publishing
//!
//! A lease on a (zone, record) pair is held from publish through validation
//! to retraction, so two issuances touching the same `_acme-challenge`
//! record never overwrite each other's value mid-validation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// (zone id, record name)
pub type RecordKey = (String, String);

type LockMap = DashMap<RecordKey, Arc<Mutex<()>>>;

/// Registry of per-record locks; cheap to clone and share
#[derive(Debug, Clone, Default)]
pub struct RecordLocks {
    locks: Arc<LockMap>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key, waiting for current holders to finish
    ///
    /// Keys are sorted and deduplicated before locking so two callers with
    /// overlapping key sets cannot deadlock.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = RecordKey>) -> RecordLease {
        let mut keys: Vec<RecordKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self.locks.entry(key.clone()).or_default().clone();
            trace!(zone = %key.0, record = %key.1, "Waiting for record lock");
            guards.push((key, lock.lock_owned().await));
        }

        RecordLease {
            guards,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held locks; released on drop
#[derive(Debug)]
pub struct RecordLease {
    guards: Vec<(RecordKey, OwnedMutexGuard<()>)>,
    locks: Arc<LockMap>,
}

impl RecordLease {
    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.guards.iter().map(|(key, _)| key)
    }
}

impl Drop for RecordLease {
    fn drop(&mut self) {
        for (key, guard) in self.guards.drain(..) {
            drop(guard);
            // Only the map holds the mutex now, nobody is waiting on it
            self.locks
                .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}
