//! In-memory share statistics.
//!
//! Provides the per-second sliding window, the thread-safe per-worker
//! accumulator and registry behind the live statistics service, and the
//! hour-bucketed day aggregates used by share log replay.

pub mod day;
pub mod registry;
pub mod status;
pub mod window;
pub mod worker;

pub use day::DayStats;
pub use registry::WorkerRegistry;
pub use status::{merge_statuses, ServerStatus, WorkerStatus};
pub use window::StatsWindow;
pub use worker::WorkerShares;
