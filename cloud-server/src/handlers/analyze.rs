//! `analyze-threat` function

use axum::{extract::State, Json};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppState, AppResult, AppError};
use crate::services::llm::{self, PacketSummary, ThreatAnalysis};

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub packets: Option<Vec<PacketSummary>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub success: bool,
    pub analysis: ThreatAnalysis,
    pub packets_analyzed: usize,
    pub timestamp: String,
}

pub async fn analyze_threat(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> AppResult<Json<AnalyzeResponse>> {
    let packets = req.packets
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::ValidationError("No packets provided for analysis".to_string()))?;

    tracing::info!("Analyzing batch of {} requests", packets.len());
    let analysis = llm::analyze(&state.http, &state.config, &packets).await?;
    tracing::info!(
        "Verdict: threat={} type={:?} severity={:?} confidence={:.2}",
        analysis.is_threat, analysis.threat_type, analysis.severity, analysis.confidence
    );

    Ok(Json(AnalyzeResponse {
        success: true,
        analysis,
        packets_analyzed: packets.len(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}
