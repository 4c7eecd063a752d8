//! Sentinel Core - Traffic Risk Scoring & Threat Derivation
//!
//! Scores observed network requests, derives threats, aggregates rolling
//! statistics, gates external alerts and bridges to a remote classifier.

pub mod api;
pub mod constants;
pub mod logic;

pub use api::{CommandError, MonitorHandle, MonitorSnapshot};
pub use logic::engine::{Engine, Services};
pub use logic::events::{EventBus, MonitorEvent};
