//! Buffered, day-partitioned share log appender.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use sharelog_protocol::Share;
use thiserror::Error;
use tracing::{debug, info};

pub const SECS_PER_DAY: u32 = 86_400;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("share log io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Buffers decoded shares and appends them to one file per UTC day.
///
/// Open handles are cached per day key; a failed flush keeps the buffer so
/// the next attempt retries the whole batch (duplicated records on a
/// partial write are acceptable, the aggregation is additive and the
/// pipeline is at-least-once anyway).
pub struct ShareLogWriter {
    data_dir: PathBuf,
    buffer: Vec<Share>,
    handles: HashMap<u32, File>,
}

impl ShareLogWriter {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, WriterError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        Ok(Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            buffer: Vec::new(),
            handles: HashMap::new(),
        })
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn push(&mut self, share: Share) {
        self.buffer.push(share);
    }

    pub fn file_path(&self, day_key: u32) -> PathBuf {
        self.data_dir
            .join(format!("sharelog-{}.bin", format_day(day_key)))
    }

    fn handle(&mut self, day_key: u32) -> Result<&mut File, WriterError> {
        match self.handles.entry(day_key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let path = self
                    .data_dir
                    .join(format!("sharelog-{}.bin", format_day(day_key)));
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                info!("opened share log {}", path.display());
                Ok(entry.insert(file))
            }
        }
    }

    /// Write every buffered share to its day file. The buffer clears only
    /// once the full contents reached disk.
    pub fn flush_to_disk(&mut self) -> Result<usize, WriterError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let mut by_day: HashMap<u32, Vec<u8>> = HashMap::new();
        for share in &self.buffer {
            by_day
                .entry(share.day_key())
                .or_default()
                .extend_from_slice(&share.to_bytes());
        }

        for (day_key, bytes) in by_day {
            let file = self.handle(day_key)?;
            file.write_all(&bytes)?;
            file.flush()?;
        }

        let flushed = self.buffer.len();
        self.buffer.clear();
        debug!("flushed {flushed} shares to disk");
        Ok(flushed)
    }

    /// Close cached handles for days that ended more than one day before
    /// `now`'s day. Yesterday's handle stays; shares can straddle midnight.
    pub fn try_close_old_handles(&mut self, now: u32) {
        let today = now - now % SECS_PER_DAY;
        let cutoff = today.saturating_sub(SECS_PER_DAY);
        let before = self.handles.len();
        self.handles.retain(|day_key, _| *day_key >= cutoff);
        let closed = before - self.handles.len();
        if closed > 0 {
            info!("closed {closed} old share log handles");
        }
    }
}

/// `YYYYMMDD` of a UTC day-start timestamp.
pub fn format_day(day_key: u32) -> String {
    chrono::DateTime::from_timestamp(day_key as i64, 0)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_else(|| day_key.to_string())
}
