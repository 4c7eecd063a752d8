//! HTTP handlers

pub mod health;
pub mod analyze;
pub mod alerts;
pub mod metrics;
pub mod threats;
pub mod agents;
