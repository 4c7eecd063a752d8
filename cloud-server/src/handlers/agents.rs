//! Agent fleet handlers

use axum::{extract::State, Json};

use crate::{AppState, AppResult};
use crate::middleware::auth::UserContext;
use crate::registry::AgentStatus;

pub async fn list(
    State(state): State<AppState>,
    _user: UserContext,
) -> AppResult<Json<Vec<AgentStatus>>> {
    Ok(Json(state.registry.list().await))
}
