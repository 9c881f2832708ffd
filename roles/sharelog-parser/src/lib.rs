//! Share log replay service.
//!
//! Reads the binary day files produced by the share log writer and turns
//! them into per-worker hour and day statistics in the database. Sealed
//! days are replayed in one memory-mapped pass; the current day is tailed
//! incrementally while it is still being appended to.

pub mod db;
pub mod parser;
