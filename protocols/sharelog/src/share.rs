use std::convert::TryFrom;
use std::fmt;

use thiserror::Error;

/// Size of one serialized share record. Fixed by the on-disk contract:
/// existing share log files must keep replaying bit-exactly.
pub const SHARE_RECORD_SIZE: usize = 48;

const SECS_PER_DAY: u32 = 86_400;
const SECS_PER_HOUR: u32 = 3_600;

/// Outcome of a submitted share. Only accept-vs-reject matters to the
/// aggregation; reject subcodes are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareResult {
    Accept,
    Reject(u32),
}

impl ShareResult {
    pub const ACCEPT_CODE: u32 = 1;
    pub const REJECT_CODE: u32 = 0;
    pub const STALE_JOB_CODE: u32 = 2;
    pub const DUPLICATE_CODE: u32 = 3;
    pub const LOW_DIFFICULTY_CODE: u32 = 4;

    pub fn from_code(code: u32) -> Self {
        if code == Self::ACCEPT_CODE {
            ShareResult::Accept
        } else {
            ShareResult::Reject(code)
        }
    }

    pub fn code(self) -> u32 {
        match self {
            ShareResult::Accept => Self::ACCEPT_CODE,
            ShareResult::Reject(code) => code,
        }
    }

    pub fn is_accept(self) -> bool {
        matches!(self, ShareResult::Accept)
    }
}

/// Identity of a worker: miners reusing the same user and worker names on
/// several machines collapse into one key on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    pub user_id: i32,
    pub worker_id: i64,
}

impl WorkerKey {
    pub fn new(user_id: i32, worker_id: i64) -> Self {
        Self { user_id, worker_id }
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.worker_id)
    }
}

/// One proof-of-work submission.
///
/// Serialized layout, little-endian, offsets fixed:
///
/// | offset | field         |
/// |--------|---------------|
/// | 0      | `job_id`      |
/// | 8      | `worker_id`   |
/// | 16     | `user_id`     |
/// | 20     | `ip`          |
/// | 24     | `share_value` |
/// | 32     | `timestamp`   |
/// | 36     | `result`      |
/// | 40     | `block_bits`  |
/// | 44     | `job_diff`    |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Share {
    pub job_id: u64,
    pub worker_id: i64,
    pub user_id: i32,
    /// IPv4 address of the submitter, host byte order.
    pub ip: u32,
    /// Weight of the share.
    pub share_value: u64,
    /// Unix seconds at submission.
    pub timestamp: u32,
    pub result: ShareResult,
    /// Network target at the share's job, compact encoding.
    pub block_bits: u32,
    /// Difficulty assigned to the share's job. Opaque to the aggregation.
    pub job_diff: u32,
}

/// Errors raised while decoding share records.
#[derive(Debug, Error)]
pub enum ShareDecodeError {
    #[error("share record must be {SHARE_RECORD_SIZE} bytes, got {actual}")]
    InvalidLength { actual: usize },
}

impl Share {
    pub fn key(&self) -> WorkerKey {
        WorkerKey::new(self.user_id, self.worker_id)
    }

    /// Start of the share's UTC day.
    pub fn day_key(&self) -> u32 {
        self.timestamp - self.timestamp % SECS_PER_DAY
    }

    /// Hour of the share's UTC day, 0..=23.
    pub fn hour_idx(&self) -> usize {
        ((self.timestamp % SECS_PER_DAY) / SECS_PER_HOUR) as usize
    }

    pub fn is_accept(&self) -> bool {
        self.result.is_accept()
    }

    /// Difficulty-weighted valuation of the share: the fraction of the
    /// network difficulty its weight represents, clamped to 1.0 so a share
    /// can never outscore a full block.
    pub fn score(&self) -> f64 {
        if self.share_value == 0 || self.block_bits == 0 {
            return 0.0;
        }
        let network = network_difficulty(self.block_bits);
        if network <= self.share_value as f64 {
            return 1.0;
        }
        self.share_value as f64 / network
    }

    pub fn to_bytes(&self) -> [u8; SHARE_RECORD_SIZE] {
        let mut buf = [0u8; SHARE_RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.job_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.worker_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.user_id.to_le_bytes());
        buf[20..24].copy_from_slice(&self.ip.to_le_bytes());
        buf[24..32].copy_from_slice(&self.share_value.to_le_bytes());
        buf[32..36].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[36..40].copy_from_slice(&self.result.code().to_le_bytes());
        buf[40..44].copy_from_slice(&self.block_bits.to_le_bytes());
        buf[44..48].copy_from_slice(&self.job_diff.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ShareDecodeError> {
        if buf.len() != SHARE_RECORD_SIZE {
            return Err(ShareDecodeError::InvalidLength { actual: buf.len() });
        }
        let u32_at = |off: usize| {
            u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
        };
        let u64_at = |off: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[off..off + 8]);
            u64::from_le_bytes(bytes)
        };
        Ok(Share {
            job_id: u64_at(0),
            worker_id: u64_at(8) as i64,
            user_id: u32_at(16) as i32,
            ip: u32_at(20),
            share_value: u64_at(24),
            timestamp: u32_at(32),
            result: ShareResult::from_code(u32_at(36)),
            block_bits: u32_at(40),
            job_diff: u32_at(44),
        })
    }
}

impl TryFrom<&[u8]> for Share {
    type Error = ShareDecodeError;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        Share::from_bytes(buf)
    }
}

/// Expand a compact-bits target into a network difficulty relative to
/// difficulty 1, the same mantissa/exponent float walk Bitcoin Core uses.
pub fn network_difficulty(bits: u32) -> f64 {
    let mantissa = (bits & 0x00ff_ffff) as f64;
    if mantissa == 0.0 {
        return 0.0;
    }
    let mut shift = (bits >> 24) & 0xff;
    let mut diff = 65_535.0 / mantissa;
    while shift < 29 {
        diff *= 256.0;
        shift += 1;
    }
    while shift > 29 {
        diff /= 256.0;
        shift -= 1;
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_share() -> Share {
        Share {
            job_id: 0x1122_3344_5566_7788,
            worker_id: 42,
            user_id: 7,
            ip: 0x0102_0304,
            share_value: 1024,
            timestamp: 1_700_000_000,
            result: ShareResult::Accept,
            block_bits: 0x1d00_ffff,
            job_diff: 1024,
        }
    }

    #[test]
    fn test_record_size_is_fixed() {
        assert_eq!(sample_share().to_bytes().len(), SHARE_RECORD_SIZE);
        assert_eq!(SHARE_RECORD_SIZE, 48);
    }

    #[test]
    fn test_field_offsets() {
        let bytes = sample_share().to_bytes();
        assert_eq!(u64::from_le_bytes(bytes[0..8].try_into().unwrap()), 0x1122_3344_5566_7788);
        assert_eq!(i64::from_le_bytes(bytes[8..16].try_into().unwrap()), 42);
        assert_eq!(i32::from_le_bytes(bytes[16..20].try_into().unwrap()), 7);
        assert_eq!(u32::from_le_bytes(bytes[20..24].try_into().unwrap()), 0x0102_0304);
        assert_eq!(u64::from_le_bytes(bytes[24..32].try_into().unwrap()), 1024);
        assert_eq!(u32::from_le_bytes(bytes[32..36].try_into().unwrap()), 1_700_000_000);
        assert_eq!(u32::from_le_bytes(bytes[36..40].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 0x1d00_ffff);
        assert_eq!(u32::from_le_bytes(bytes[44..48].try_into().unwrap()), 1024);
    }

    #[test]
    fn test_round_trip() {
        let share = sample_share();
        let decoded = Share::from_bytes(&share.to_bytes()).unwrap();
        assert_eq!(decoded, share);
    }

    #[test]
    fn test_round_trip_negative_ids() {
        let mut share = sample_share();
        share.worker_id = -9;
        share.user_id = -3;
        let decoded = Share::from_bytes(&share.to_bytes()).unwrap();
        assert_eq!(decoded.worker_id, -9);
        assert_eq!(decoded.user_id, -3);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let err = Share::from_bytes(&[0u8; 47]).unwrap_err();
        assert!(matches!(err, ShareDecodeError::InvalidLength { actual: 47 }));
        assert!(Share::from_bytes(&[0u8; 49]).is_err());
    }

    #[test]
    fn test_result_codes_round_trip() {
        assert_eq!(ShareResult::from_code(1), ShareResult::Accept);
        assert_eq!(ShareResult::from_code(0), ShareResult::Reject(0));
        assert_eq!(ShareResult::from_code(3), ShareResult::Reject(3));
        // unknown subcodes survive re-encoding untouched
        assert_eq!(ShareResult::from_code(99).code(), 99);
        assert!(!ShareResult::from_code(2).is_accept());
    }

    #[test]
    fn test_day_and_hour_helpers() {
        let mut share = sample_share();
        share.timestamp = 86_400 * 3 + 2 * 3_600 + 59;
        assert_eq!(share.day_key(), 86_400 * 3);
        assert_eq!(share.hour_idx(), 2);

        share.timestamp = 86_400 * 3 + 23 * 3_600 + 3_599;
        assert_eq!(share.hour_idx(), 23);
    }

    #[test]
    fn test_difficulty_one_at_genesis_bits() {
        assert!((network_difficulty(0x1d00_ffff) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_score_is_clamped_and_proportional() {
        let mut share = sample_share();
        // network difficulty 1.0, weight 1024: clamped to a full block
        assert_eq!(share.score(), 1.0);

        // weight far below the network difficulty scores proportionally
        share.block_bits = 0x1b00_ffff; // 65536x harder than diff 1
        let score = share.score();
        assert!(score > 0.0 && score < 1.0);
        assert!((score - 1024.0 / network_difficulty(0x1b00_ffff)).abs() < 1e-12);

        share.share_value = 0;
        assert_eq!(share.score(), 0.0);
        share.share_value = 1024;
        share.block_bits = 0;
        assert_eq!(share.score(), 0.0);
    }
}
