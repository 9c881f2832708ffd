//! Live share statistics service.
//!
//! Consumes the `ShareLog` topic, keeps sliding-window aggregates per
//! worker and for the whole pool, answers status queries over HTTP, and
//! periodically flushes worker snapshots to the database.

pub mod db;
pub mod server;
