//! Detected threat model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use validator::{Validate, ValidationError};

pub const SEVERITIES: [&str; 4] = ["critical", "high", "medium", "low"];
pub const STATUSES: [&str; 4] = ["active", "investigating", "blocked", "resolved"];

const DEFAULT_THREAT_LIMIT: i64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DetectedThreat {
    pub id: Uuid,
    pub agent_id: String,
    pub threat_type: String,
    pub severity: String,
    pub description: String,
    pub source_ip: Option<String>,
    pub destination_ip: Option<String>,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub process_name: Option<String>,
    pub process_pid: Option<i32>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Threat as reported by an agent or a monitoring session
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AgentThreat {
    #[validate(length(min = 1, max = 100))]
    pub threat_type: String,
    #[validate(custom(function = "validate_severity"))]
    pub severity: String,
    #[validate(length(min = 1))]
    pub description: String,
    pub source_ip: Option<String>,
    pub destination_ip: Option<String>,
    #[validate(range(min = 0, max = 65535))]
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub process_name: Option<String>,
    pub process_pid: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateThreat {
    /// Client-assigned id, so a session's local copy and the hosted row agree
    pub id: Option<Uuid>,
    #[validate(length(min = 1, max = 255))]
    pub agent_id: Option<String>,
    #[serde(flatten)]
    #[validate(nested)]
    pub threat: AgentThreat,
    #[validate(custom(function = "validate_status"))]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateThreatStatus {
    #[validate(custom(function = "validate_status"))]
    pub status: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ThreatFilter {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub agent_id: Option<String>,
    pub limit: Option<i64>,
}

fn validate_severity(value: &str) -> Result<(), ValidationError> {
    if SEVERITIES.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new("unknown_severity"))
    }
}

fn validate_status(value: &str) -> Result<(), ValidationError> {
    if STATUSES.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new("unknown_status"))
    }
}

/// Blocked and resolved threats are closed; any other status reopens.
pub fn closes_threat(status: &str) -> bool {
    matches!(status, "blocked" | "resolved")
}

impl DetectedThreat {
    pub async fn insert(
        pool: &PgPool,
        id: Option<Uuid>,
        agent_id: &str,
        data: &AgentThreat,
        status: &str,
    ) -> Result<Self, sqlx::Error> {
        let resolved_at = closes_threat(status).then(Utc::now);

        sqlx::query_as::<_, DetectedThreat>(
            r#"
            INSERT INTO detected_threats
                (id, agent_id, threat_type, severity, description, source_ip, destination_ip,
                 port, protocol, process_name, process_pid, status, resolved_at)
            VALUES (COALESCE($1, gen_random_uuid()), $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET id = detected_threats.id
            RETURNING *
            "#
        )
        .bind(id)
        .bind(agent_id)
        .bind(&data.threat_type)
        .bind(&data.severity)
        .bind(&data.description)
        .bind(&data.source_ip)
        .bind(&data.destination_ip)
        .bind(data.port)
        .bind(&data.protocol)
        .bind(&data.process_name)
        .bind(data.process_pid)
        .bind(status)
        .bind(resolved_at)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DetectedThreat>("SELECT * FROM detected_threats WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Newest first
    pub async fn list(pool: &PgPool, filter: ThreatFilter) -> Result<Vec<Self>, sqlx::Error> {
        let limit = filter.limit.unwrap_or(DEFAULT_THREAT_LIMIT).clamp(1, DEFAULT_THREAT_LIMIT);

        sqlx::query_as::<_, DetectedThreat>(
            r#"
            SELECT * FROM detected_threats
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR severity = $2)
              AND ($3::text IS NULL OR agent_id = $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#
        )
        .bind(filter.status)
        .bind(filter.severity)
        .bind(filter.agent_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let resolved_at = closes_threat(status).then(Utc::now);

        sqlx::query_as::<_, DetectedThreat>(
            r#"
            UPDATE detected_threats
            SET status = $2, resolved_at = $3
            WHERE id = $1
            RETURNING *
            "#
        )
        .bind(id)
        .bind(status)
        .bind(resolved_at)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closing_statuses() {
        assert!(closes_threat("blocked"));
        assert!(closes_threat("resolved"));
        assert!(!closes_threat("active"));
        assert!(!closes_threat("investigating"));
    }

    #[test]
    fn test_unknown_severity_rejected() {
        let threat: AgentThreat = serde_json::from_value(serde_json::json!({
            "threat_type": "crypto_miner",
            "severity": "urgent",
            "description": "xmrig pinned at 390% CPU"
        }))
        .unwrap();
        assert!(threat.validate().is_err());
    }

    #[test]
    fn test_create_threat_flattens_fields() {
        let req: CreateThreat = serde_json::from_value(serde_json::json!({
            "id": "8f14e45f-ceea-467f-a0e6-2b4c1b1b7a10",
            "threat_type": "data_exfiltration",
            "severity": "high",
            "description": "Large data transfer to cdn.other.io",
            "source_ip": "cdn.other.io",
            "status": "blocked"
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.threat.severity, "high");
        assert_eq!(req.status.as_deref(), Some("blocked"));
        assert!(req.agent_id.is_none());
    }

    #[test]
    fn test_bad_status_update_rejected() {
        let update = UpdateThreatStatus { status: "deleted".to_string() };
        assert!(update.validate().is_err());
    }
}
