//! Host metrics model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use validator::Validate;

use super::{AgentThreat, ProcessInfo};

pub const DEFAULT_METRICS_LIMIT: i64 = 100;
const MAX_METRICS_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemMetric {
    pub id: Uuid,
    pub agent_id: String,
    pub hostname: String,
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub memory_total: Option<i64>,
    pub memory_used: Option<i64>,
    pub disk_usage: Option<f32>,
    pub network_in: i64,
    pub network_out: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetricsInput {
    #[validate(range(min = 0.0))]
    pub cpu_usage: f32,
    #[validate(range(min = 0.0, max = 100.0))]
    pub memory_usage: f32,
    pub memory_total: Option<i64>,
    pub memory_used: Option<i64>,
    #[validate(range(min = 0.0, max = 100.0))]
    pub disk_usage: Option<f32>,
    pub network_in: Option<i64>,
    pub network_out: Option<i64>,
}

/// Body of `POST /functions/v1/system-metrics`.
///
/// The three identifying fields are optional at the serde level so that a
/// missing one produces the ingestion error message instead of a generic
/// deserialization rejection.
#[derive(Debug, Deserialize, Validate)]
pub struct AgentPayload {
    #[validate(length(max = 255))]
    pub agent_id: Option<String>,
    #[validate(length(max = 255))]
    pub hostname: Option<String>,
    #[validate(nested)]
    pub metrics: Option<MetricsInput>,
    #[serde(default)]
    #[validate(nested)]
    pub processes: Vec<ProcessInfo>,
    #[serde(default)]
    #[validate(nested)]
    pub threats: Vec<AgentThreat>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MetricsQuery {
    pub limit: Option<i64>,
}

impl MetricsQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_METRICS_LIMIT)
            .clamp(1, MAX_METRICS_LIMIT)
    }
}

impl SystemMetric {
    pub async fn insert(
        pool: &PgPool,
        agent_id: &str,
        hostname: &str,
        metrics: &MetricsInput,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, SystemMetric>(
            r#"
            INSERT INTO system_metrics
                (agent_id, hostname, cpu_usage, memory_usage, memory_total, memory_used, disk_usage, network_in, network_out)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#
        )
        .bind(agent_id)
        .bind(hostname)
        .bind(metrics.cpu_usage)
        .bind(metrics.memory_usage)
        .bind(metrics.memory_total)
        .bind(metrics.memory_used)
        .bind(metrics.disk_usage)
        .bind(metrics.network_in.unwrap_or(0))
        .bind(metrics.network_out.unwrap_or(0))
        .fetch_one(pool)
        .await
    }

    /// Newest samples first
    pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, SystemMetric>(
            "SELECT * FROM system_metrics ORDER BY created_at DESC LIMIT $1"
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
