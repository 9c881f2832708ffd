//! Two-mode replay of a day's share log.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use sharelog_protocol::{Share, WorkerKey, SHARE_RECORD_SIZE};
use thiserror::Error;
use tracing::{debug, info};
use worker_stats::DayStats;

pub const SECS_PER_DAY: u32 = 86_400;

/// Records consumed per growing-file read, about 24 MB of share records.
pub const GROWING_CHUNK_RECORDS: usize = 500_000;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("share log io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Replays one UTC day's share log into per-worker [`DayStats`].
///
/// A sealed day (any day before today) is read in a single pass over a
/// whole-file memory map. The growing current-day file is consumed
/// incrementally: `last_position` advances by whole records only, so a
/// partially appended trailing record is picked up by a later read.
pub struct ShareLogParser {
    date: u32,
    file_path: PathBuf,
    workers: HashMap<WorkerKey, DayStats>,
    last_position: u64,
}

impl ShareLogParser {
    /// `date` is any timestamp inside the target day; it is truncated to
    /// the UTC day start.
    pub fn new<P: AsRef<Path>>(data_dir: P, date: u32) -> Self {
        let date = date - date % SECS_PER_DAY;
        let file_path = data_dir
            .as_ref()
            .join(format!("sharelog-{}.bin", format_day(date)));
        Self {
            date,
            file_path,
            workers: HashMap::new(),
            last_position: 0,
        }
    }

    pub fn date(&self) -> u32 {
        self.date
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Bytes of the file consumed so far; always a whole number of records.
    pub fn last_position(&self) -> u64 {
        self.last_position
    }

    pub fn workers(&self) -> &HashMap<WorkerKey, DayStats> {
        &self.workers
    }

    pub fn workers_mut(&mut self) -> &mut HashMap<WorkerKey, DayStats> {
        &mut self.workers
    }

    /// Replay a sealed day file in one pass. Returns records processed.
    pub fn process_unchanged(&mut self) -> Result<u64, ParserError> {
        let file = File::open(&self.file_path)?;
        // mapping the whole file from offset zero keeps the kernel's page
        // alignment rules out of the picture
        let mmap = unsafe { Mmap::map(&file)? };
        let records = self.parse_records(&mmap);
        self.last_position = records * SHARE_RECORD_SIZE as u64;
        info!(
            "replayed {} records from {}",
            records,
            self.file_path.display()
        );
        Ok(records)
    }

    /// Consume up to [`GROWING_CHUNK_RECORDS`] whole records appended since
    /// the last call. Returns how many were processed.
    pub fn process_growing(&mut self) -> Result<u64, ParserError> {
        let mut file = File::open(&self.file_path)?;
        file.seek(SeekFrom::Start(self.last_position))?;

        let mut buf = Vec::new();
        file.take((GROWING_CHUNK_RECORDS * SHARE_RECORD_SIZE) as u64)
            .read_to_end(&mut buf)?;

        let whole = buf.len() - buf.len() % SHARE_RECORD_SIZE;
        let records = self.parse_records(&buf[..whole]);
        self.last_position += records * SHARE_RECORD_SIZE as u64;
        Ok(records)
    }

    /// Whether another read would find no new whole record. Only meaningful
    /// for the growing mode.
    pub fn is_reach_eof(&self) -> Result<bool, ParserError> {
        let len = std::fs::metadata(&self.file_path)?.len();
        Ok(len < self.last_position + SHARE_RECORD_SIZE as u64)
    }

    fn parse_records(&mut self, buf: &[u8]) -> u64 {
        let mut records = 0;
        for chunk in buf.chunks_exact(SHARE_RECORD_SIZE) {
            match Share::from_bytes(chunk) {
                Ok(share) => self.apply(&share),
                Err(e) => debug!("skipping undecodable record: {e}"),
            }
            records += 1;
        }
        records
    }

    fn apply(&mut self, share: &Share) {
        let hour_idx = share.hour_idx();
        self.workers
            .entry(share.key())
            .or_default()
            .process_share(hour_idx, share);
    }
}

/// `YYYYMMDD` of a UTC day-start timestamp.
pub fn format_day(day_key: u32) -> String {
    chrono::DateTime::from_timestamp(day_key as i64, 0)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_else(|| day_key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharelog_protocol::ShareResult;
    use std::io::Write;
    use tempfile::TempDir;

    const DAY: u32 = 19_700 * SECS_PER_DAY;

    fn share(user_id: i32, worker_id: i64, value: u64, hour: u32, result: ShareResult) -> Share {
        Share {
            job_id: 1,
            worker_id,
            user_id,
            ip: 1,
            share_value: value,
            timestamp: DAY + hour * 3600 + 30,
            result,
            block_bits: 0x1d00_ffff,
            job_diff: 1,
        }
    }

    fn write_log(dir: &Path, shares: &[Share]) -> PathBuf {
        let path = dir.join(format!("sharelog-{}.bin", format_day(DAY)));
        let mut file = File::create(&path).unwrap();
        for share in shares {
            file.write_all(&share.to_bytes()).unwrap();
        }
        path
    }

    #[test]
    fn test_sealed_day_totals() {
        let temp_dir = TempDir::new().unwrap();
        let shares = [
            share(1, 1, 10, 0, ShareResult::Accept),
            share(1, 1, 5, 1, ShareResult::Accept),
            share(1, 1, 7, 1, ShareResult::Reject(0)),
            share(2, 9, 3, 23, ShareResult::Accept),
        ];
        write_log(temp_dir.path(), &shares);

        let mut parser = ShareLogParser::new(temp_dir.path(), DAY + 123);
        assert_eq!(parser.process_unchanged().unwrap(), 4);

        // accepted and rejected weight across all workers match the file
        let accept_total: u64 = parser.workers().values().map(|s| s.day().0).sum();
        let reject_total: u64 = parser.workers().values().map(|s| s.day().1).sum();
        assert_eq!(accept_total, 18);
        assert_eq!(reject_total, 7);

        let first = &parser.workers()[&WorkerKey::new(1, 1)];
        assert_eq!(first.hour(0), (10, 0, 1.0));
        assert_eq!(first.hour(1), (5, 7, 1.0));
        assert_eq!(first.day(), (15, 7, 2.0));
        assert_eq!(first.dirty_hours(), 0b11);

        let second = &parser.workers()[&WorkerKey::new(2, 9)];
        assert_eq!(second.hour(23), (3, 0, 1.0));
        assert_eq!(second.dirty_hours(), 1 << 23);
    }

    #[test]
    fn test_growing_day_leaves_partial_trailing_record() {
        let temp_dir = TempDir::new().unwrap();
        let shares = [
            share(1, 1, 1, 0, ShareResult::Accept),
            share(1, 1, 2, 0, ShareResult::Accept),
            share(1, 1, 4, 0, ShareResult::Accept),
        ];
        let path = write_log(temp_dir.path(), &shares[..2]);
        // half of the third record has landed so far
        let partial = shares[2].to_bytes();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..24]).unwrap();

        let mut parser = ShareLogParser::new(temp_dir.path(), DAY);
        assert_eq!(parser.process_growing().unwrap(), 2);
        assert_eq!(parser.last_position(), 2 * SHARE_RECORD_SIZE as u64);
        assert!(parser.is_reach_eof().unwrap());

        // the rest of the record arrives, plus nothing else
        file.write_all(&partial[24..]).unwrap();
        assert!(!parser.is_reach_eof().unwrap());
        assert_eq!(parser.process_growing().unwrap(), 1);
        assert_eq!(parser.last_position(), 3 * SHARE_RECORD_SIZE as u64);
        assert!(parser.is_reach_eof().unwrap());

        let stats = &parser.workers()[&WorkerKey::new(1, 1)];
        assert_eq!(stats.day().0, 7);
    }

    #[test]
    fn test_growing_then_more_records() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_log(
            temp_dir.path(),
            &[share(1, 1, 1, 2, ShareResult::Accept)],
        );

        let mut parser = ShareLogParser::new(temp_dir.path(), DAY);
        assert_eq!(parser.process_growing().unwrap(), 1);
        assert_eq!(parser.process_growing().unwrap(), 0);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&share(1, 1, 8, 3, ShareResult::Accept).to_bytes())
            .unwrap();
        assert_eq!(parser.process_growing().unwrap(), 1);

        let stats = &parser.workers()[&WorkerKey::new(1, 1)];
        assert_eq!(stats.hour(2).0, 1);
        assert_eq!(stats.hour(3).0, 8);
    }

    #[test]
    fn test_date_is_truncated_to_day_start() {
        let parser = ShareLogParser::new("/tmp", DAY + 4321);
        assert_eq!(parser.date(), DAY);
        assert!(parser
            .file_path()
            .to_str()
            .unwrap()
            .ends_with(&format!("sharelog-{}.bin", format_day(DAY))));
    }

    #[test]
    fn test_missing_file_errors() {
        let temp_dir = TempDir::new().unwrap();
        let mut parser = ShareLogParser::new(temp_dir.path(), DAY);
        assert!(parser.process_unchanged().is_err());
        assert!(parser.process_growing().is_err());
        assert!(parser.is_reach_eof().is_err());
    }
}
