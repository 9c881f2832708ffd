//! Shared state and background loops of the live statistics service.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use share_bus::{BusConsumer, BusError};
use sharelog_protocol::{Share, WorkerKey};
use tracing::{debug, error, info, warn};
use worker_stats::{ServerStatus, WorkerRegistry, WorkerShares, WorkerStatus};

use crate::db::{StatsDb, WorkerRow};

pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

/// State shared between the ingest loop, the flusher, and the HTTP API.
pub struct StatsServer {
    registry: WorkerRegistry,
    /// Pool-wide aggregate, fed alongside every per-worker update.
    pool: WorkerShares,
    started_at: u32,
    idle_seconds: u32,
    pub request_count: AtomicU64,
    pub response_bytes: AtomicU64,
    malformed_count: AtomicU64,
    flushing: AtomicBool,
    running: AtomicBool,
}

impl StatsServer {
    pub fn new(idle_seconds: u32) -> Self {
        Self {
            registry: WorkerRegistry::new(),
            pool: WorkerShares::new(0, 0),
            started_at: unix_now(),
            idle_seconds,
            request_count: AtomicU64::new(0),
            response_bytes: AtomicU64::new(0),
            malformed_count: AtomicU64::new(0),
            flushing: AtomicBool::new(false),
            running: AtomicBool::new(true),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Apply one decoded share to its worker and to the pool aggregate.
    pub fn process_share(&self, share: &Share) {
        let worker = self.registry.get_or_create(share.key());
        worker.process_share(share);
        self.pool.process_share(share);
    }

    /// Decode and apply one bus payload. Malformed payloads are dropped
    /// and counted.
    pub fn process_payload(&self, payload: &[u8]) {
        match Share::from_bytes(payload) {
            Ok(share) => self.process_share(&share),
            Err(e) => {
                let dropped = self.malformed_count.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!("dropping malformed share ({dropped} so far): {e}");
                }
            }
        }
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed_count.load(Ordering::Relaxed)
    }

    pub fn server_status(&self, now: u32) -> ServerStatus {
        ServerStatus {
            uptime_seconds: now.saturating_sub(self.started_at) as u64,
            request_count: self.request_count.load(Ordering::Relaxed),
            worker_count: self.registry.worker_count().max(0) as u64,
            user_count: self.registry.user_count().max(0) as u64,
            response_bytes: self.response_bytes.load(Ordering::Relaxed),
            pool: self.pool.status_at(now),
        }
    }

    /// Statuses for one user's workers; absent workers come back all-zero.
    pub fn worker_statuses(&self, user_id: i32, worker_ids: &[i64], now: u32) -> Vec<WorkerStatus> {
        let keys: Vec<WorkerKey> = worker_ids
            .iter()
            .map(|&worker_id| WorkerKey::new(user_id, worker_id))
            .collect();
        self.registry.status_batch(&keys, now)
    }
}

/// Drive the live ingest loop until the server stops or the bus fails for
/// good, in which case the error is handed to the caller so the process can
/// exit and be restarted by supervision.
pub async fn run_ingest(server: Arc<StatsServer>, mut consumer: BusConsumer) -> Result<(), BusError> {
    info!("ingest loop started");
    while server.is_running() {
        match consumer.recv().await {
            Ok(payload) => server.process_payload(&payload),
            Err(e) => {
                error!("share bus failed, leaving ingest loop: {e}");
                return Err(e);
            }
        }
    }
    info!("ingest loop stopped");
    Ok(())
}

/// Periodic snapshot-to-DB flush plus the idle-worker sweep. A tick that
/// lands while the previous flush is still running is skipped.
pub async fn run_flusher(
    server: Arc<StatsServer>,
    db: Arc<StatsDb>,
    period: Duration,
    batch_size: usize,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // the first tick completes immediately
    while server.is_running() {
        interval.tick().await;
        if server.flushing.swap(true, Ordering::SeqCst) {
            debug!("previous flush still running, skipping tick");
            continue;
        }
        let now = unix_now();
        if let Err(e) = flush_workers(&server, &db, now, batch_size).await {
            error!("worker flush failed, keeping in-memory state: {e}");
        }
        let swept = server.registry.sweep_expired(now, server.idle_seconds);
        if swept > 0 {
            info!("swept {swept} idle workers");
        }
        server.flushing.store(false, Ordering::SeqCst);
    }
}

async fn flush_workers(
    server: &StatsServer,
    db: &StatsDb,
    now: u32,
    batch_size: usize,
) -> Result<(), crate::db::StorageError> {
    // snapshot under the read lock, then work without it
    let workers = server.registry.snapshot();
    if workers.is_empty() {
        return Ok(());
    }
    let rows: Vec<WorkerRow> = workers
        .iter()
        .map(|(key, shares)| WorkerRow {
            key: *key,
            status: shares.status_at(now),
            updated_at: now,
        })
        .collect();
    for chunk in rows.chunks(batch_size.max(1)) {
        db.upsert_workers(chunk).await?;
    }
    debug!("flushed {} workers", rows.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharelog_protocol::ShareResult;

    const T: u32 = 1_700_000_000;

    fn share(user_id: i32, worker_id: i64, value: u64, timestamp: u32) -> Share {
        Share {
            job_id: 9,
            worker_id,
            user_id,
            ip: 0x0102_0304,
            share_value: value,
            timestamp,
            result: ShareResult::Accept,
            block_bits: 0x1d00_ffff,
            job_diff: 4,
        }
    }

    #[test]
    fn test_share_feeds_worker_and_pool() {
        let server = StatsServer::new(3600);
        server.process_share(&share(1, 2, 4, T));
        server.process_share(&share(3, 4, 6, T));

        let statuses = server.worker_statuses(1, &[2], T);
        assert_eq!(statuses[0].accept_1m, 4);
        assert_eq!(statuses[0].accept_count, 1);
        assert_eq!(statuses[0].last_share_ip, 0x0102_0304);
        assert_eq!(statuses[0].last_share_time, T);

        let status = server.server_status(T);
        assert_eq!(status.worker_count, 2);
        assert_eq!(status.user_count, 2);
        assert_eq!(status.pool.accept_1m, 10);
        assert_eq!(status.pool.accept_count, 2);
    }

    #[test]
    fn test_unknown_worker_reads_zero() {
        let server = StatsServer::new(3600);
        let statuses = server.worker_statuses(1, &[7, 8], T);
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0], WorkerStatus::default());
        assert_eq!(statuses[1], WorkerStatus::default());
    }

    #[test]
    fn test_malformed_payload_counted_not_applied() {
        let server = StatsServer::new(3600);
        server.process_payload(&[0u8; 17]);
        server.process_payload(&share(1, 2, 4, T).to_bytes());

        assert_eq!(server.malformed_count(), 1);
        assert_eq!(server.server_status(T).worker_count, 1);
    }

    #[test]
    fn test_stop_flag() {
        let server = StatsServer::new(3600);
        assert!(server.is_running());
        server.stop();
        assert!(!server.is_running());
    }
}
