//! Query projections of the live statistics state.

use serde::{Deserialize, Serialize};

/// Windowed view of one worker's recent shares, computed backwards from a
/// wall-clock second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub accept_1m: u64,
    pub accept_5m: u64,
    pub accept_15m: u64,
    pub reject_15m: u64,
    pub accept_count: u32,
    pub last_share_ip: u32,
    pub last_share_time: u32,
}

/// Server-wide view served at the API root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub uptime_seconds: u64,
    pub request_count: u64,
    pub worker_count: u64,
    pub user_count: u64,
    pub response_bytes: u64,
    pub pool: WorkerStatus,
}

/// Combine several worker statuses into one: window counters and the accept
/// count sum, the last-share fields follow the most recent share (first
/// encountered wins a tie).
pub fn merge_statuses(statuses: &[WorkerStatus]) -> WorkerStatus {
    let mut merged = WorkerStatus::default();
    for status in statuses {
        merged.accept_1m += status.accept_1m;
        merged.accept_5m += status.accept_5m;
        merged.accept_15m += status.accept_15m;
        merged.reject_15m += status.reject_15m;
        merged.accept_count += status.accept_count;
        if status.last_share_time > merged.last_share_time {
            merged.last_share_time = status.last_share_time;
            merged.last_share_ip = status.last_share_ip;
        }
    }
    merged
}
