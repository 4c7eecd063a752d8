//! Threat History
//!
//! Newest persisted threats, kept current from the store's change feed.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use super::persistence::{
    ChangeEvent, Order, StoreError, StoredThreat, ThreatFilter, ThreatPatch, ThreatStore,
    HISTORY_LIMIT,
};
use super::threat::{Severity, ThreatStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreatHistoryStats {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub active: usize,
    pub blocked: usize,
    /// Rows with `resolved_at` set
    pub resolved: usize,
}

pub struct ThreatHistory {
    store: Arc<dyn ThreatStore>,
    changes: broadcast::Receiver<ChangeEvent>,
    threats: Vec<StoredThreat>,
}

impl ThreatHistory {
    /// Subscribe first, then load, so no change between the two is lost
    pub async fn load(store: Arc<dyn ThreatStore>) -> Result<Self, StoreError> {
        let changes = store.subscribe();
        let mut history = Self {
            store,
            changes,
            threats: Vec::new(),
        };
        history.refresh().await?;
        Ok(history)
    }

    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        self.threats = self
            .store
            .query(&ThreatFilter::default(), HISTORY_LIMIT, Order::NewestFirst)
            .await?;
        Ok(())
    }

    /// Apply every queued change event; returns how many were applied
    pub fn sync(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.changes.try_recv() {
                Ok(event) => {
                    self.apply(event);
                    applied += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    log::warn!("[ThreatHistory] Missed {} change events", missed);
                }
                Err(_) => break,
            }
        }
        applied
    }

    pub fn apply(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::Inserted(row) => {
                if !self.threats.iter().any(|t| t.id == row.id) {
                    self.threats.insert(0, row);
                    self.threats.truncate(HISTORY_LIMIT);
                }
            }
            ChangeEvent::Updated(row) => {
                if let Some(existing) = self.threats.iter_mut().find(|t| t.id == row.id) {
                    *existing = row;
                }
            }
        }
    }

    pub fn threats(&self) -> &[StoredThreat] {
        &self.threats
    }

    pub fn stats(&self) -> ThreatHistoryStats {
        let mut stats = ThreatHistoryStats {
            total: self.threats.len(),
            ..Default::default()
        };
        for t in &self.threats {
            match t.severity {
                Severity::Critical => stats.critical += 1,
                Severity::High => stats.high += 1,
                Severity::Medium => stats.medium += 1,
                Severity::Low => stats.low += 1,
            }
            match t.status {
                ThreatStatus::Active => stats.active += 1,
                ThreatStatus::Blocked => stats.blocked += 1,
                _ => {}
            }
            if t.resolved_at.is_some() {
                stats.resolved += 1;
            }
        }
        stats
    }

    /// Persist first; the local copy changes only when the store succeeds
    pub async fn update_status(&mut self, id: &str, status: ThreatStatus) -> Result<bool, StoreError> {
        let patch = ThreatPatch::status_change(status, Utc::now());
        match self.store.update(id, patch).await {
            Ok(Some(row)) => {
                self.apply(ChangeEvent::Updated(row));
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                log::error!("[ThreatHistory] Failed to update threat {}: {}", id, e);
                Err(e)
            }
        }
    }

    /// Rows are never deleted; they are marked resolved instead
    pub async fn resolve(&mut self, id: &str) -> Result<bool, StoreError> {
        self.update_status(id, ThreatStatus::Resolved).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::persistence::{NewThreatRecord, SqliteThreatStore};
    use async_trait::async_trait;

    fn record(severity: Severity) -> NewThreatRecord {
        NewThreatRecord {
            id: None,
            agent_id: "browser-agent".into(),
            threat_type: "unknown_origin".into(),
            severity,
            description: "Third-party script execution".into(),
            source_ip: Some("cdn.other.io".into()),
            destination_ip: Some("localhost".into()),
            port: None,
            protocol: Some("HTTPS".into()),
            process_name: None,
            process_pid: None,
            status: ThreatStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_load_and_live_updates() {
        let store: Arc<dyn ThreatStore> = Arc::new(SqliteThreatStore::open_memory().unwrap());
        store.insert(record(Severity::High)).await.unwrap();

        let mut history = ThreatHistory::load(store.clone()).await.unwrap();
        assert_eq!(history.threats().len(), 1);

        let newer = store.insert(record(Severity::Critical)).await.unwrap();
        // One insert event from before load (deduplicated) plus the new one
        history.sync();
        assert_eq!(history.threats().len(), 2);
        assert_eq!(history.threats()[0].id, newer.id);
    }

    #[tokio::test]
    async fn test_stats_and_resolve() {
        let store: Arc<dyn ThreatStore> = Arc::new(SqliteThreatStore::open_memory().unwrap());
        let a = store.insert(record(Severity::Critical)).await.unwrap();
        let b = store.insert(record(Severity::Low)).await.unwrap();
        store.insert(record(Severity::Low)).await.unwrap();

        let mut history = ThreatHistory::load(store).await.unwrap();
        assert!(history.update_status(&a.id, ThreatStatus::Blocked).await.unwrap());
        assert!(history.resolve(&b.id).await.unwrap());
        assert!(!history.resolve("missing").await.unwrap());

        let stats = history.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.critical, 1);
        assert_eq!(stats.low, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.resolved, 2);
    }

    #[tokio::test]
    async fn test_live_inserts_stay_within_limit() {
        let store: Arc<dyn ThreatStore> = Arc::new(SqliteThreatStore::open_memory().unwrap());
        let mut history = ThreatHistory::load(store.clone()).await.unwrap();

        let mut newest = None;
        for _ in 0..HISTORY_LIMIT + 25 {
            newest = Some(store.insert(record(Severity::Medium)).await.unwrap());
            history.sync();
        }

        assert_eq!(history.threats().len(), HISTORY_LIMIT);
        assert_eq!(history.threats()[0].id, newest.unwrap().id);
    }

    struct FailingStore {
        inner: SqliteThreatStore,
    }

    #[async_trait]
    impl ThreatStore for FailingStore {
        async fn insert(&self, record: NewThreatRecord) -> Result<StoredThreat, StoreError> {
            self.inner.insert(record).await
        }
        async fn query(&self, f: &ThreatFilter, l: usize, o: Order) -> Result<Vec<StoredThreat>, StoreError> {
            self.inner.query(f, l, o).await
        }
        async fn update(&self, _id: &str, _p: ThreatPatch) -> Result<Option<StoredThreat>, StoreError> {
            Err(StoreError::Corrupt("read-only".into()))
        }
        fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn test_failed_update_leaves_local_state() {
        let inner = SqliteThreatStore::open_memory().unwrap();
        let row = inner.insert(record(Severity::High)).await.unwrap();
        let store: Arc<dyn ThreatStore> = Arc::new(FailingStore { inner });

        let mut history = ThreatHistory::load(store).await.unwrap();
        assert!(history.update_status(&row.id, ThreatStatus::Blocked).await.is_err());
        assert_eq!(history.threats()[0].status, ThreatStatus::Active);
        assert_eq!(history.stats().resolved, 0);
    }
}
