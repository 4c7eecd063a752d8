//! API Module
//!
//! Operator-facing command surface of the monitor.
//!
//! Structure:
//! - commands.rs: `MonitorHandle`, its commands, snapshots and errors
//!
//! Usage:
//! - `api::MonitorHandle::snapshot()` - Current buffers, stats and timers
//! - `api::MonitorHandle::analyze_now()` - Manual remote classification

pub mod commands;

pub use commands::{CommandError, HistorySnapshot, MonitorHandle, MonitorSnapshot};
