//! AI Bridge - Remote Classification
//!
//! Packages recent traffic for the remote `analyze-threat` function and
//! maps its verdict back into the local `Threat` shape.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::config::FunctionsConfig;
use super::threat::{Severity, Threat, ThreatStatus, ThreatType};
use super::traffic::ObservedRequest;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const FUNCTION_NAME: &str = "analyze-threat";

/// Most recent requests sent per call
pub const MAX_BATCH: usize = 20;

/// Prefix marking remote-verdict threats
pub const AI_DESCRIPTION_PREFIX: &str = "[AI] ";

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,
    #[error("AI credits exhausted. Please add funds to continue.")]
    QuotaExhausted,
    #[error("Classification service error ({status}): {message}")]
    Service { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid AI response format: {0}")]
    InvalidResponse(String),
    #[error("No requests to analyze")]
    NoRequests,
}

impl BridgeError {
    /// Transient failures; the next tick may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::RateLimited
                | BridgeError::QuotaExhausted
                | BridgeError::Service { .. }
                | BridgeError::Network(_)
        )
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Structured verdict from the remote classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAnalysis {
    pub is_threat: bool,
    pub threat_type: Option<ThreatType>,
    pub severity: Option<Severity>,
    pub confidence: f64,
    pub description: String,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default)]
    pub indicators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub success: bool,
    pub analysis: ThreatAnalysis,
    pub packets_analyzed: usize,
    pub timestamp: String,
}

/// One request as sent on the wire; dates are ISO-8601 strings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRequest {
    pub id: String,
    pub timestamp: String,
    pub url: String,
    pub domain: String,
    pub protocol: String,
    pub method: String,
    pub initiator_type: String,
    pub duration: f64,
    pub transfer_size: u64,
    pub status: String,
    pub risk_score: u8,
    pub risk_reasons: Vec<String>,
}

impl From<&ObservedRequest> for SerializedRequest {
    fn from(r: &ObservedRequest) -> Self {
        Self {
            id: r.id.clone(),
            timestamp: r.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            url: r.url.clone(),
            domain: r.domain.clone(),
            protocol: r.protocol.as_str().to_string(),
            method: r.method.clone(),
            initiator_type: r.initiator_type.clone(),
            duration: r.duration_ms,
            transfer_size: r.transfer_bytes,
            status: r.status.as_str().to_string(),
            risk_score: r.risk_score,
            risk_reasons: r.reason_strings(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeRequest {
    pub packets: Vec<SerializedRequest>,
}

impl AnalyzeRequest {
    /// Up to `MAX_BATCH` requests from a newest-first slice
    pub fn from_recent(requests: &[ObservedRequest]) -> Self {
        Self {
            packets: requests.iter().take(MAX_BATCH).map(SerializedRequest::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

// ============================================================================
// VERDICT MAPPING
// ============================================================================

/// A threat when the verdict is positive and fully typed, else `None`
pub fn analysis_to_threat(
    analysis: &ThreatAnalysis,
    requests: &[ObservedRequest],
    page_host: &str,
    now: DateTime<Utc>,
) -> Option<Threat> {
    if !analysis.is_threat {
        return None;
    }
    let (threat_type, severity) = (analysis.threat_type?, analysis.severity?);

    Some(Threat {
        id: Uuid::new_v4().to_string(),
        threat_type,
        severity,
        source: requests
            .first()
            .map(|r| r.domain.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        target: page_host.to_string(),
        timestamp: now,
        status: ThreatStatus::Active,
        description: format!("{}{}", AI_DESCRIPTION_PREFIX, analysis.description),
        request_id: None,
    })
}

// ============================================================================
// SERVICE
// ============================================================================

#[async_trait]
pub trait ClassificationService: Send + Sync {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisResult, BridgeError>;
}

/// Submit a newest-first batch; at most `MAX_BATCH` are sent
pub async fn analyze_batch(
    service: &dyn ClassificationService,
    requests: &[ObservedRequest],
) -> Result<AnalysisResult, BridgeError> {
    if requests.is_empty() {
        return Err(BridgeError::NoRequests);
    }
    let body = AnalyzeRequest::from_recent(requests);
    log::info!("[AIBridge] Submitting {} requests for analysis", body.packets.len());
    service.analyze(&body).await
}

/// Calls `<functions_url>/analyze-threat`
pub struct HttpClassificationClient {
    config: FunctionsConfig,
    http_client: reqwest::Client,
}

impl HttpClassificationClient {
    pub fn new(config: FunctionsConfig) -> Self {
        let http_client = config.http_client();
        Self { config, http_client }
    }
}

#[async_trait]
impl ClassificationService for HttpClassificationClient {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisResult, BridgeError> {
        let url = self.config.endpoint(FUNCTION_NAME);

        let mut builder = self.http_client.post(&url).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<AnalysisResult>()
                .await
                .map_err(|e| BridgeError::InvalidResponse(e.to_string()));
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| status.to_string());

        Err(map_status(status, message))
    }
}

fn map_status(status: StatusCode, message: String) -> BridgeError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => BridgeError::RateLimited,
        StatusCode::PAYMENT_REQUIRED => BridgeError::QuotaExhausted,
        _ => BridgeError::Service {
            status: status.as_u16(),
            message,
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================
