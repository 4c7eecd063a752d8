//! Logic Module - Scoring, Threats & Engines
//!
//! ## Pipeline
//! - `traffic/` - Resource-timing entries to scored, deduplicated requests
//! - `threat/` - Threat synthesis from scored requests
//! - `aggregator` - Bounded newest-first buffers and rolling stats
//! - `alerts/` - Channel settings, alert gate, dispatch client
//! - `ai_bridge` - Remote classification of recent traffic
//!
//! ## Runtime
//! - `engine/` - Event loop owning all monitoring state
//! - `analysis_loop` - Cancellable timers feeding the engine
//! - `source` - Observation feeds
//! - `events` - Broadcast of engine activity
//! - `persistence/`, `history` - Stored threats and their live view
//! - `identity/` - Signed-in operator and role gate
//! - `agent/` - Host metrics reporter

// Core pipeline
pub mod traffic;
pub mod threat;
pub mod aggregator;
pub mod alerts;
pub mod ai_bridge;

// Runtime
pub mod config;
pub mod engine;
pub mod analysis_loop;
pub mod source;
pub mod events;
pub mod persistence;
pub mod history;
pub mod identity;
pub mod agent;
