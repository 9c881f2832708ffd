//! Share log writer service.
//!
//! Consumes the `ShareLog` topic on its own consumer group and appends each
//! share as a raw 48-byte record to `sharelog-YYYYMMDD.bin` under the data
//! directory, partitioned by UTC day.

pub mod writer;
