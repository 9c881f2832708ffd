//! Wire format for pool share events.
//!
//! A share travels as a fixed 48-byte little-endian record, both on the
//! message bus (one record per message) and in the day-partitioned share log
//! files on disk. The layout is a compatibility contract with files already
//! written; see [`share::Share`].

pub mod share;

pub use share::{Share, ShareDecodeError, ShareResult, WorkerKey, SHARE_RECORD_SIZE};
