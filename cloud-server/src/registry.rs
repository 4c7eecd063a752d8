//! In-memory fleet view: which agents are reporting and which have gone quiet

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::models::SystemMetric;

/// An agent is online while its newest sample is younger than this
pub const ONLINE_WINDOW_SECS: i64 = 60;
pub const REFRESH_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub hostname: String,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub disk_usage: Option<f32>,
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, AgentStatus>>,
}

fn is_online(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    (now - last_seen).num_seconds() < ONLINE_WINDOW_SECS
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one stored sample; older samples never overwrite newer ones
    pub async fn record(&self, metric: &SystemMetric) {
        self.record_at(metric, Utc::now()).await;
    }

    async fn record_at(&self, metric: &SystemMetric, now: DateTime<Utc>) {
        let mut agents = self.agents.write().await;
        if let Some(existing) = agents.get(&metric.agent_id) {
            if existing.last_seen > metric.created_at {
                return;
            }
        }
        agents.insert(
            metric.agent_id.clone(),
            AgentStatus {
                agent_id: metric.agent_id.clone(),
                hostname: metric.hostname.clone(),
                online: is_online(metric.created_at, now),
                last_seen: metric.created_at,
                cpu_usage: metric.cpu_usage,
                memory_usage: metric.memory_usage,
                disk_usage: metric.disk_usage,
            },
        );
    }

    /// Populate from stored samples at start-up
    pub async fn seed(&self, metrics: &[SystemMetric]) {
        for metric in metrics {
            self.record(metric).await;
        }
        tracing::info!("Agent registry seeded with {} agents", self.agents.read().await.len());
    }

    /// Recompute online flags; returns how many agents changed state
    pub async fn refresh(&self, now: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for status in self.agents.write().await.values_mut() {
            let online = is_online(status.last_seen, now);
            if online != status.online {
                if !online {
                    tracing::warn!("Agent {} ({}) went offline", status.agent_id, status.hostname);
                }
                status.online = online;
                changed += 1;
            }
        }
        changed
    }

    /// Sorted by hostname
    pub async fn list(&self) -> Vec<AgentStatus> {
        let mut agents: Vec<_> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.hostname.cmp(&b.hostname).then(a.agent_id.cmp(&b.agent_id)));
        agents
    }

    pub fn spawn_refresh(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_PERIOD);
            loop {
                ticker.tick().await;
                let changed = self.refresh(Utc::now()).await;
                if changed > 0 {
                    tracing::debug!("Agent registry: {} status changes", changed);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn metric(agent_id: &str, created_at: DateTime<Utc>, cpu: f32) -> SystemMetric {
        SystemMetric {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            hostname: agent_id.trim_start_matches("agent-").to_string(),
            cpu_usage: cpu,
            memory_usage: 41.0,
            memory_total: Some(16_000_000_000),
            memory_used: Some(6_560_000_000),
            disk_usage: Some(72.5),
            network_in: 1024,
            network_out: 2048,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_online_window() {
        let registry = AgentRegistry::new();
        let now = Utc::now();
        registry.record_at(&metric("agent-web-01", now - ChronoDuration::seconds(5), 10.0), now).await;
        registry.record_at(&metric("agent-db-01", now - ChronoDuration::seconds(90), 20.0), now).await;

        let agents = registry.list().await;
        assert_eq!(agents[0].hostname, "db-01");
        assert!(!agents[0].online);
        assert!(agents[1].online);
    }

    #[tokio::test]
    async fn test_refresh_marks_quiet_agents_offline() {
        let registry = AgentRegistry::new();
        let now = Utc::now();
        registry.record_at(&metric("agent-web-01", now, 10.0), now).await;

        assert_eq!(registry.refresh(now + ChronoDuration::seconds(30)).await, 0);
        assert_eq!(registry.refresh(now + ChronoDuration::seconds(61)).await, 1);
        assert!(!registry.list().await[0].online);
    }

    #[tokio::test]
    async fn test_older_sample_ignored() {
        let registry = AgentRegistry::new();
        let now = Utc::now();
        registry.record_at(&metric("agent-web-01", now, 55.0), now).await;
        registry.record_at(&metric("agent-web-01", now - ChronoDuration::seconds(10), 5.0), now).await;

        assert_eq!(registry.list().await[0].cpu_usage, 55.0);
    }
}
