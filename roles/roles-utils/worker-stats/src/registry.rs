//! Concurrent map of live workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use sharelog_protocol::WorkerKey;

use crate::status::WorkerStatus;
use crate::worker::WorkerShares;

/// Seconds without a share before a worker is swept.
pub const DEFAULT_IDLE_SECS: u32 = 3_600;

/// Registry of live workers keyed by `(user_id, worker_id)`.
///
/// One reader-writer lock guards the key map and the per-user worker count
/// together; the worker totals are read from atomics without taking it.
/// Per-worker mutexes are only ever taken while holding the registry lock,
/// never the other way around.
pub struct WorkerRegistry {
    inner: RwLock<Index>,
    total_workers: AtomicI64,
    total_users: AtomicI64,
}

#[derive(Default)]
struct Index {
    by_key: HashMap<WorkerKey, Arc<WorkerShares>>,
    workers_per_user: HashMap<i32, i32>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Index::default()),
            total_workers: AtomicI64::new(0),
            total_users: AtomicI64::new(0),
        }
    }

    pub fn get(&self, key: WorkerKey) -> Option<Arc<WorkerShares>> {
        self.inner.read().unwrap().by_key.get(&key).cloned()
    }

    /// Look up a worker, creating it on first sight. The common path takes
    /// only the read lock; insertion re-checks under the write lock.
    pub fn get_or_create(&self, key: WorkerKey) -> Arc<WorkerShares> {
        if let Some(worker) = self.get(key) {
            return worker;
        }
        let mut index = self.inner.write().unwrap();
        if let Some(worker) = index.by_key.get(&key) {
            return worker.clone();
        }
        let worker = Arc::new(WorkerShares::new(key.user_id, key.worker_id));
        index.by_key.insert(key, worker.clone());
        let users = index.workers_per_user.entry(key.user_id).or_insert(0);
        *users += 1;
        if *users == 1 {
            self.total_users.fetch_add(1, Ordering::Relaxed);
        }
        self.total_workers.fetch_add(1, Ordering::Relaxed);
        worker
    }

    /// Statuses for a list of keys in one pass under the read lock. Keys
    /// with no live worker yield an all-zero status.
    pub fn status_batch(&self, keys: &[WorkerKey], now: u32) -> Vec<WorkerStatus> {
        let index = self.inner.read().unwrap();
        keys.iter()
            .map(|key| {
                index
                    .by_key
                    .get(key)
                    .map(|worker| worker.status_at(now))
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Clone out every live worker so callers can work without the lock.
    pub fn snapshot(&self) -> Vec<(WorkerKey, Arc<WorkerShares>)> {
        let index = self.inner.read().unwrap();
        index
            .by_key
            .iter()
            .map(|(key, worker)| (*key, worker.clone()))
            .collect()
    }

    /// Drop every worker idle for longer than `idle_seconds`, maintaining
    /// the per-user index. Returns how many were removed.
    pub fn sweep_expired(&self, now: u32, idle_seconds: u32) -> usize {
        let mut index = self.inner.write().unwrap();
        let expired: Vec<WorkerKey> = index
            .by_key
            .iter()
            .filter(|(_, worker)| worker.is_expired(now, idle_seconds))
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            index.by_key.remove(key);
            if let Some(count) = index.workers_per_user.get_mut(&key.user_id) {
                *count -= 1;
                if *count <= 0 {
                    index.workers_per_user.remove(&key.user_id);
                    self.total_users.fetch_sub(1, Ordering::Relaxed);
                }
            }
            self.total_workers.fetch_sub(1, Ordering::Relaxed);
        }
        expired.len()
    }

    pub fn worker_count(&self) -> i64 {
        self.total_workers.load(Ordering::Relaxed)
    }

    pub fn user_count(&self) -> i64 {
        self.total_users.load(Ordering::Relaxed)
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
