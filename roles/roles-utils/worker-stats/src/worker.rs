//! Thread-safe accumulator for one worker's shares.

use std::sync::Mutex;

use sharelog_protocol::Share;

use crate::status::WorkerStatus;
use crate::window::StatsWindow;

/// Seconds of per-second accept history retained per worker.
pub const ACCEPT_WINDOW_SECS: usize = 900;
/// Minutes of per-minute reject history retained per worker.
pub const REJECT_WINDOW_MINS: usize = 60;

/// Per-worker share statistics. Created on a worker's first share and
/// dropped by the registry sweep once the worker has gone idle. A single
/// mutex serializes updates and reads for one worker.
pub struct WorkerShares {
    user_id: i32,
    worker_id: i64,
    inner: Mutex<Accumulators>,
}

struct Accumulators {
    accept_count: u32,
    last_share_ip: u32,
    last_share_time: u32,
    accept_per_sec: StatsWindow<u64>,
    reject_per_min: StatsWindow<u64>,
}

impl WorkerShares {
    pub fn new(user_id: i32, worker_id: i64) -> Self {
        Self {
            user_id,
            worker_id,
            inner: Mutex::new(Accumulators {
                accept_count: 0,
                last_share_ip: 0,
                last_share_time: 0,
                accept_per_sec: StatsWindow::new(ACCEPT_WINDOW_SECS),
                reject_per_min: StatsWindow::new(REJECT_WINDOW_MINS),
            }),
        }
    }

    pub fn user_id(&self) -> i32 {
        self.user_id
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    pub fn process_share(&self, share: &Share) {
        let mut acc = self.inner.lock().unwrap();
        acc.last_share_ip = share.ip;
        acc.last_share_time = share.timestamp;
        if share.is_accept() {
            acc.accept_count += 1;
            acc.accept_per_sec
                .insert(share.timestamp as i64, share.share_value);
        } else {
            acc.reject_per_min
                .insert(share.timestamp as i64 / 60, share.share_value);
        }
    }

    /// Windowed status computed backwards from `now` (Unix seconds).
    pub fn status_at(&self, now: u32) -> WorkerStatus {
        let acc = self.inner.lock().unwrap();
        let now = now as i64;
        WorkerStatus {
            accept_1m: acc.accept_per_sec.sum(now, 60),
            accept_5m: acc.accept_per_sec.sum(now, 300),
            accept_15m: acc.accept_per_sec.sum(now, 900),
            reject_15m: acc.reject_per_min.sum(now / 60, 15),
            accept_count: acc.accept_count,
            last_share_ip: acc.last_share_ip,
            last_share_time: acc.last_share_time,
        }
    }

    pub fn is_expired(&self, now: u32, idle_seconds: u32) -> bool {
        let last = self.inner.lock().unwrap().last_share_time;
        now.saturating_sub(last) > idle_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharelog_protocol::ShareResult;

    const T: u32 = 1_700_000_000;

    fn share_at(timestamp: u32, value: u64, result: ShareResult) -> Share {
        Share {
            job_id: 1,
            worker_id: 2,
            user_id: 1,
            ip: 0x0102_0304,
            share_value: value,
            timestamp,
            result,
            block_bits: 0x1d00_ffff,
            job_diff: 4,
        }
    }

    #[test]
    fn test_single_accept_share_status() {
        let worker = WorkerShares::new(1, 2);
        worker.process_share(&share_at(T, 4, ShareResult::Accept));

        let status = worker.status_at(T);
        assert_eq!(status.accept_1m, 4);
        assert_eq!(status.accept_5m, 4);
        assert_eq!(status.accept_15m, 4);
        assert_eq!(status.reject_15m, 0);
        assert_eq!(status.accept_count, 1);
        assert_eq!(status.last_share_ip, 0x0102_0304);
        assert_eq!(status.last_share_time, T);
    }

    #[test]
    fn test_windows_age_out() {
        let worker = WorkerShares::new(1, 2);
        worker.process_share(&share_at(T, 1, ShareResult::Accept));
        worker.process_share(&share_at(T + 30, 1, ShareResult::Accept));

        assert_eq!(worker.status_at(T + 30).accept_1m, 2);
        // the share at T has left the minute window, T + 30 remains
        assert_eq!(worker.status_at(T + 89).accept_1m, 1);
        // both are gone from 5m but still inside 15m
        let late = worker.status_at(T + 700);
        assert_eq!(late.accept_5m, 0);
        assert_eq!(late.accept_15m, 2);
    }

    #[test]
    fn test_rejects_bucket_per_minute() {
        let worker = WorkerShares::new(1, 2);
        worker.process_share(&share_at(T, 3, ShareResult::Reject(2)));
        worker.process_share(&share_at(T + 5, 2, ShareResult::Reject(0)));

        let status = worker.status_at(T + 5);
        assert_eq!(status.reject_15m, 5);
        assert_eq!(status.accept_15m, 0);
        assert_eq!(status.accept_count, 0);
        // a rejected share still refreshes the last-share fields
        assert_eq!(status.last_share_time, T + 5);
    }

    #[test]
    fn test_is_expired() {
        let worker = WorkerShares::new(1, 2);
        worker.process_share(&share_at(T, 1, ShareResult::Accept));

        assert!(!worker.is_expired(T + 3600, 3600));
        assert!(worker.is_expired(T + 3601, 3600));
    }
}
