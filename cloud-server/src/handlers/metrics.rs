//! Agent ingestion (`system-metrics`) and metrics queries

use axum::{extract::{State, Query}, Json};
use serde::Serialize;
use validator::Validate;

use crate::{AppState, AppResult, AppError};
use crate::models::{AgentPayload, DetectedThreat, MetricsQuery, SystemMetric, SystemProcess};
use crate::middleware::auth::UserContext;

#[derive(Debug, Serialize)]
pub struct ProcessedCounts {
    pub metrics: bool,
    pub processes: usize,
    pub threats: usize,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub message: &'static str,
    pub processed: ProcessedCounts,
}

/// Store one agent report. Only the metrics row is mandatory; process and
/// threat failures are logged and the report is still acknowledged.
pub async fn ingest(
    State(state): State<AppState>,
    Json(payload): Json<AgentPayload>,
) -> AppResult<Json<IngestResponse>> {
    let (Some(agent_id), Some(hostname), Some(metrics)) = (
        payload.agent_id.as_deref().filter(|s| !s.is_empty()),
        payload.hostname.as_deref().filter(|s| !s.is_empty()),
        payload.metrics.as_ref(),
    ) else {
        return Err(AppError::ValidationError(
            "Missing required fields: agent_id, hostname, metrics".to_string(),
        ));
    };
    payload.validate()?;

    tracing::debug!("Metrics received from agent {}", agent_id);

    let row = SystemMetric::insert(&state.pool, agent_id, hostname, metrics).await?;
    state.registry.record(&row).await;

    if !payload.processes.is_empty() {
        if let Err(e) = SystemProcess::replace_for_agent(&state.pool, agent_id, &payload.processes).await {
            tracing::error!("Error storing processes for {}: {}", agent_id, e);
        }
    }

    let mut stored_threats = 0;
    for threat in &payload.threats {
        match DetectedThreat::insert(&state.pool, None, agent_id, threat, "active").await {
            Ok(_) => stored_threats += 1,
            Err(e) => tracing::error!("Error storing threat from {}: {}", agent_id, e),
        }
    }
    if stored_threats > 0 {
        tracing::info!("Inserted {} new threats from {}", stored_threats, agent_id);
    }

    Ok(Json(IngestResponse {
        success: true,
        message: "Metrics received",
        processed: ProcessedCounts {
            metrics: true,
            processes: payload.processes.len(),
            threats: payload.threats.len(),
        },
    }))
}

/// Newest samples across all agents
pub async fn list(
    State(state): State<AppState>,
    _user: UserContext,
    Query(query): Query<MetricsQuery>,
) -> AppResult<Json<Vec<SystemMetric>>> {
    let metrics = SystemMetric::list_recent(&state.pool, query.effective_limit()).await?;
    Ok(Json(metrics))
}

/// Latest process snapshots, busiest first
pub async fn processes(
    State(state): State<AppState>,
    _user: UserContext,
) -> AppResult<Json<Vec<SystemProcess>>> {
    let processes = SystemProcess::list_all(&state.pool).await?;
    Ok(Json(processes))
}
