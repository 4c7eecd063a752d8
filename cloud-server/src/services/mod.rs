//! Outbound integrations: classification gateway, email and SMS providers

pub mod email;
pub mod llm;
pub mod sms;

use serde::{Deserialize, Serialize};

/// Failure of a single outbound channel; its message is reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{0}")]
    NotConfigured(&'static str),

    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChannelTarget {
    #[serde(default)]
    pub to: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AlertChannels {
    pub email: Option<ChannelTarget>,
    pub sms: Option<ChannelTarget>,
}

/// Body of `POST /functions/v1/send-threat-alert`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAlert {
    pub threat_type: String,
    pub severity: String,
    pub description: String,
    pub source: String,
    pub target: String,
    pub timestamp: String,
    #[serde(default)]
    pub channels: AlertChannels,
}

impl ThreatAlert {
    pub fn emoji(&self) -> &'static str {
        match self.severity.as_str() {
            "critical" => "🚨",
            "high" => "⚠️",
            "medium" => "🔶",
            _ => "ℹ️",
        }
    }

    pub fn color(&self) -> &'static str {
        match self.severity.as_str() {
            "critical" => "#dc2626",
            "high" => "#ea580c",
            _ => "#eab308",
        }
    }

    /// e.g. `🚨 CRITICAL THREAT DETECTED`
    pub fn headline(&self) -> String {
        format!("{} {} THREAT DETECTED", self.emoji(), self.severity.to_uppercase())
    }

    /// Timestamp as shown to a person; unparsable input is shown as sent
    pub fn display_time(&self) -> String {
        chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|_| self.timestamp.clone())
    }
}

/// Provider error bodies carry a `message` field
fn provider_message(body: &serde_json::Value, fallback: &str) -> String {
    body.get("message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
pub(crate) fn sample_alert(severity: &str) -> ThreatAlert {
    ThreatAlert {
        threat_type: "Data Exfiltration".to_string(),
        severity: severity.to_string(),
        description: "Large data transfer (146.5KB) to cdn.other.io".to_string(),
        source: "cdn.other.io".to_string(),
        target: "app.example.com".to_string(),
        timestamp: "2026-03-14T09:26:53.000Z".to_string(),
        channels: AlertChannels::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_styling() {
        assert_eq!(sample_alert("critical").color(), "#dc2626");
        assert_eq!(sample_alert("high").color(), "#ea580c");
        assert_eq!(sample_alert("low").color(), "#eab308");
        assert_eq!(sample_alert("medium").emoji(), "🔶");
        assert_eq!(sample_alert("high").headline(), "⚠️ HIGH THREAT DETECTED");
    }

    #[test]
    fn test_display_time() {
        assert_eq!(sample_alert("low").display_time(), "2026-03-14 09:26:53 UTC");

        let mut alert = sample_alert("low");
        alert.timestamp = "yesterday".to_string();
        assert_eq!(alert.display_time(), "yesterday");
    }

    #[test]
    fn test_provider_message_fallback() {
        let body = serde_json::json!({"message": "Invalid `to` field"});
        assert_eq!(provider_message(&body, "Failed"), "Invalid `to` field");
        assert_eq!(provider_message(&serde_json::json!({}), "Failed"), "Failed");
    }
}
