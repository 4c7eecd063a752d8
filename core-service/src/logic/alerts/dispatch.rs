//! Alert Dispatch
//!
//! Request/response contract of the remote `send-threat-alert` function
//! and the HTTP client that calls it.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::settings::AlertChannelSettings;
use crate::logic::config::FunctionsConfig;
use crate::logic::threat::{Severity, Threat};

pub const FUNCTION_NAME: &str = "send-threat-alert";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No alert channel is enabled")]
    NoChannel,
    #[error("Network error: {0}")]
    Network(String),
    #[error("Alert service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("Invalid alert response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTarget {
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertChannels {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<ChannelTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sms: Option<ChannelTarget>,
}

impl AlertChannels {
    /// Enabled channels that also carry an address
    pub fn from_settings(settings: &AlertChannelSettings) -> Self {
        Self {
            email: settings.email_target().map(|to| ChannelTarget { to: to.to_string() }),
            sms: settings.sms_target().map(|to| ChannelTarget { to: to.to_string() }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.sms.is_none()
    }

    /// "email & sms", for notices
    pub fn describe(&self) -> String {
        let mut names = Vec::new();
        if self.email.is_some() {
            names.push("email");
        }
        if self.sms.is_some() {
            names.push("sms");
        }
        names.join(" & ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAlertRequest {
    /// Human-readable, e.g. "Data Exfiltration"
    pub threat_type: String,
    pub severity: Severity,
    pub description: String,
    pub source: String,
    pub target: String,
    pub timestamp: String,
    pub channels: AlertChannels,
}

impl ThreatAlertRequest {
    pub fn from_threat(threat: &Threat, settings: &AlertChannelSettings) -> Self {
        Self {
            threat_type: threat.threat_type.display_name(),
            severity: threat.severity,
            description: threat.description.clone(),
            source: threat.source.clone(),
            target: threat.target.clone(),
            timestamp: iso(threat.timestamp),
            channels: AlertChannels::from_settings(settings),
        }
    }

    /// Fixed payload used to verify channel configuration
    pub fn test_alert(settings: &AlertChannelSettings, now: DateTime<Utc>) -> Self {
        Self {
            threat_type: "Test Alert".to_string(),
            severity: Severity::Critical,
            description: "This is a test alert to verify your notification channels are working correctly."
                .to_string(),
            source: "192.168.1.100".to_string(),
            target: "sentinel-dashboard".to_string(),
            timestamp: iso(now),
            channels: AlertChannels::from_settings(settings),
        }
    }
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms: Option<serde_json::Value>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDispatchResponse {
    pub success: bool,
    #[serde(default)]
    pub results: DispatchResults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AlertDispatchResponse {
    /// At least one channel accepted the alert
    pub fn reached_any(&self) -> bool {
        self.success || self.results.email.is_some() || self.results.sms.is_some()
    }

    pub fn is_partial(&self) -> bool {
        self.reached_any() && !self.results.errors.is_empty()
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, request: &ThreatAlertRequest) -> Result<AlertDispatchResponse, DispatchError>;
}

/// Calls `<functions_url>/send-threat-alert`
pub struct HttpAlertDispatcher {
    config: FunctionsConfig,
    http_client: reqwest::Client,
}

impl HttpAlertDispatcher {
    pub fn new(config: FunctionsConfig) -> Self {
        let http_client = config.http_client();
        Self { config, http_client }
    }
}

#[async_trait]
impl AlertDispatcher for HttpAlertDispatcher {
    async fn dispatch(&self, request: &ThreatAlertRequest) -> Result<AlertDispatchResponse, DispatchError> {
        if request.channels.is_empty() {
            return Err(DispatchError::NoChannel);
        }

        let url = self.config.endpoint(FUNCTION_NAME);
        log::info!(
            "[AlertChannels] Sending {} alert '{}' via {}",
            request.severity,
            request.threat_type,
            request.channels.describe()
        );

        let mut builder = self.http_client.post(&url).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        let status = response.status();
        // 207 carries a body with per-channel errors
        if status.is_success() {
            response
                .json::<AlertDispatchResponse>()
                .await
                .map_err(|e| DispatchError::InvalidResponse(e.to_string()))
        } else {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| status.to_string());
            Err(DispatchError::Service {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::threat::{ThreatStatus, ThreatType};

    fn settings() -> AlertChannelSettings {
        AlertChannelSettings {
            email_enabled: true,
            email_address: "soc@example.org".into(),
            sms_enabled: true,
            phone_number: String::new(),
            ..Default::default()
        }
    }

    #[test]
    fn test_payload_from_threat() {
        let threat = Threat {
            id: "t-1".into(),
            threat_type: ThreatType::DataExfiltration,
            severity: Severity::Critical,
            source: "evil.io".into(),
            target: "localhost".into(),
            timestamp: Utc::now(),
            status: ThreatStatus::Active,
            description: "Large data transfer: 300.0KB".into(),
            request_id: Some("r-1".into()),
        };

        let req = ThreatAlertRequest::from_threat(&threat, &settings());
        assert_eq!(req.threat_type, "Data Exfiltration");
        // SMS is enabled but has no number
        assert_eq!(req.channels.describe(), "email");

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["threatType"], "Data Exfiltration");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["channels"]["email"]["to"], "soc@example.org");
        assert!(json["channels"].get("sms").is_none());
    }

    #[test]
    fn test_test_alert_payload() {
        let req = ThreatAlertRequest::test_alert(&settings(), Utc::now());
        assert_eq!(req.threat_type, "Test Alert");
        assert_eq!(req.severity, Severity::Critical);
        assert_eq!(req.source, "192.168.1.100");
        assert_eq!(req.target, "sentinel-dashboard");
    }

    #[test]
    fn test_partial_response() {
        let body = r#"{"success":true,"results":{"email":{"id":"x"},"errors":["SMS: Twilio not configured"]}}"#;
        let resp: AlertDispatchResponse = serde_json::from_str(body).unwrap();
        assert!(resp.reached_any());
        assert!(resp.is_partial());

        let failed: AlertDispatchResponse =
            serde_json::from_str(r#"{"success":false,"results":{"errors":["Email: bounced"]}}"#).unwrap();
        assert!(!failed.reached_any());
    }
}
