//! Threat Persistence
//!
//! Durable store for detected threats with a change feed.
//!
//! ## Structure
//! - `sqlite`: `SqliteThreatStore`, the local implementation
//!
//! The store is consumed purely through `ThreatStore`: insert, filtered
//! query, update by id and an insert/update subscription.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use super::threat::{Severity, Threat, ThreatStatus};

pub use sqlite::SqliteThreatStore;

/// Rows loaded by the history view
pub const HISTORY_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

// ============================================================================
// RECORDS
// ============================================================================

/// One `detected_threats` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredThreat {
    pub id: String,
    pub agent_id: String,
    pub threat_type: String,
    pub severity: Severity,
    pub description: String,
    pub source_ip: Option<String>,
    pub destination_ip: Option<String>,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub process_name: Option<String>,
    pub process_pid: Option<i64>,
    pub status: ThreatStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Insert payload; the store assigns `created_at`
#[derive(Debug, Clone, PartialEq)]
pub struct NewThreatRecord {
    /// Reuse the in-memory id when present so both views line up
    pub id: Option<String>,
    pub agent_id: String,
    pub threat_type: String,
    pub severity: Severity,
    pub description: String,
    pub source_ip: Option<String>,
    pub destination_ip: Option<String>,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub process_name: Option<String>,
    pub process_pid: Option<i64>,
    pub status: ThreatStatus,
}

impl NewThreatRecord {
    pub fn from_threat(threat: &Threat, agent_id: &str) -> Self {
        Self {
            id: Some(threat.id.clone()),
            agent_id: agent_id.to_string(),
            threat_type: threat.threat_type.as_str().to_string(),
            severity: threat.severity,
            description: threat.description.clone(),
            source_ip: Some(threat.source.clone()),
            destination_ip: Some(threat.target.clone()),
            port: None,
            protocol: Some("HTTPS".to_string()),
            process_name: None,
            process_pid: None,
            status: threat.status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreatFilter {
    pub severity: Option<Severity>,
    pub status: Option<ThreatStatus>,
    pub agent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Fields to change; `None` leaves a column untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreatPatch {
    pub status: Option<ThreatStatus>,
    pub resolved_at: Option<Option<DateTime<Utc>>>,
}

impl ThreatPatch {
    /// Status change with the matching `resolved_at` stamp
    pub fn status_change(status: ThreatStatus, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            resolved_at: Some(status.closes().then_some(now)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Inserted(StoredThreat),
    Updated(StoredThreat),
}

// ============================================================================
// STORE TRAIT
// ============================================================================

#[async_trait]
pub trait ThreatStore: Send + Sync {
    async fn insert(&self, record: NewThreatRecord) -> Result<StoredThreat, StoreError>;

    async fn query(
        &self,
        filter: &ThreatFilter,
        limit: usize,
        order: Order,
    ) -> Result<Vec<StoredThreat>, StoreError>;

    /// `Ok(None)` when no row has this id
    async fn update(&self, id: &str, patch: ThreatPatch) -> Result<Option<StoredThreat>, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_change_stamps() {
        let now = Utc::now();
        assert_eq!(
            ThreatPatch::status_change(ThreatStatus::Blocked, now).resolved_at,
            Some(Some(now))
        );
        assert_eq!(
            ThreatPatch::status_change(ThreatStatus::Investigating, now).resolved_at,
            Some(None)
        );
    }
}
