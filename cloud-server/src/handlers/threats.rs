//! Threat history handlers

use axum::{extract::{State, Path, Query}, http::StatusCode, Json};
use uuid::Uuid;
use validator::Validate;

use crate::{AppState, AppResult, AppError};
use crate::models::{CreateThreat, DetectedThreat, ThreatFilter, UpdateThreatStatus};
use crate::middleware::auth::{require_any_role, UserContext};

/// Roles allowed to triage threats
pub const TRIAGE_ROLES: [&str; 2] = ["admin", "analyst"];

/// List threats, newest first
pub async fn list(
    State(state): State<AppState>,
    _user: UserContext,
    Query(filter): Query<ThreatFilter>,
) -> AppResult<Json<Vec<DetectedThreat>>> {
    let threats = DetectedThreat::list(&state.pool, filter).await?;
    Ok(Json(threats))
}

/// Record a threat found by a monitoring session
pub async fn create(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateThreat>,
) -> AppResult<(StatusCode, Json<DetectedThreat>)> {
    req.validate()?;

    let agent_id = req.agent_id.as_deref().unwrap_or(&user.user_id);
    let status = req.status.as_deref().unwrap_or("active");
    let threat = DetectedThreat::insert(&state.pool, req.id, agent_id, &req.threat, status).await?;

    tracing::info!("Threat {} recorded for {}", threat.id, threat.agent_id);
    Ok((StatusCode::CREATED, Json(threat)))
}

pub async fn get(
    State(state): State<AppState>,
    _user: UserContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DetectedThreat>> {
    let threat = DetectedThreat::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Threat not found".to_string()))?;

    Ok(Json(threat))
}

/// Update threat status; blocked/resolved stamp `resolved_at`, others clear it
pub async fn update_status(
    State(state): State<AppState>,
    user: UserContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateThreatStatus>,
) -> AppResult<Json<DetectedThreat>> {
    require_any_role(&user, &TRIAGE_ROLES)?;
    req.validate()?;

    let threat = DetectedThreat::update_status(&state.pool, id, &req.status)
        .await?
        .ok_or_else(|| AppError::NotFound("Threat not found".to_string()))?;

    tracing::info!("Threat {} marked {} by {}", id, threat.status, user.user_id);
    Ok(Json(threat))
}
