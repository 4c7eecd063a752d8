//! `send-threat-alert` function

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;
use crate::services::{email, sms, ThreatAlert};

#[derive(Debug, Default, Serialize)]
pub struct AlertResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms: Option<serde_json::Value>,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub success: bool,
    pub results: AlertResults,
    pub message: &'static str,
}

/// Each channel is tried independently; 207 when any of them failed
pub async fn send_threat_alert(
    State(state): State<AppState>,
    Json(alert): Json<ThreatAlert>,
) -> (StatusCode, Json<AlertResponse>) {
    tracing::info!("Alert requested: [{}] {} from {}", alert.severity, alert.threat_type, alert.source);

    let mut results = AlertResults::default();

    if let Some(to) = alert.channels.email.as_ref().map(|c| c.to.as_str()).filter(|t| !t.is_empty()) {
        match email::send(&state.http, &state.config, &alert, to).await {
            Ok(body) => results.email = Some(body),
            Err(e) => {
                tracing::error!("Email alert failed: {}", e);
                results.errors.push(format!("Email: {}", e));
            }
        }
    }

    if let Some(to) = alert.channels.sms.as_ref().map(|c| c.to.as_str()).filter(|t| !t.is_empty()) {
        match sms::send(&state.http, &state.config, &alert, to).await {
            Ok(body) => results.sms = Some(body),
            Err(e) => {
                tracing::error!("SMS alert failed: {}", e);
                results.errors.push(format!("SMS: {}", e));
            }
        }
    }

    let success = results.errors.is_empty();
    let status = if success { StatusCode::OK } else { StatusCode::MULTI_STATUS };

    (status, Json(AlertResponse {
        success,
        results,
        message: if success { "Alerts sent successfully" } else { "Some alerts failed" },
    }))
}
