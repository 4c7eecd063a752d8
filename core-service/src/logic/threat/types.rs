//! Threat Types
//!
//! Core types for synthesized security events.
//! NO logic here - only data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// THREAT TYPE
// ============================================================================

/// Threat category. The last six only come from the remote classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    SuspiciousDomain,
    DataExfiltration,
    UnusualPort,
    HighFrequency,
    LargeTransfer,
    UnknownOrigin,
    Malware,
    Intrusion,
    Ddos,
    Phishing,
    Ransomware,
    Botnet,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::SuspiciousDomain => "suspicious_domain",
            ThreatType::DataExfiltration => "data_exfiltration",
            ThreatType::UnusualPort => "unusual_port",
            ThreatType::HighFrequency => "high_frequency",
            ThreatType::LargeTransfer => "large_transfer",
            ThreatType::UnknownOrigin => "unknown_origin",
            ThreatType::Malware => "malware",
            ThreatType::Intrusion => "intrusion",
            ThreatType::Ddos => "ddos",
            ThreatType::Phishing => "phishing",
            ThreatType::Ransomware => "ransomware",
            ThreatType::Botnet => "botnet",
        }
    }

    /// `data_exfiltration` -> `Data Exfiltration`
    pub fn display_name(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn is_remote_only(&self) -> bool {
        matches!(
            self,
            ThreatType::Malware
                | ThreatType::Intrusion
                | ThreatType::Ddos
                | ThreatType::Phishing
                | ThreatType::Ransomware
                | ThreatType::Botnet
        )
    }
}

impl std::fmt::Display for ThreatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Critical => "🚨",
            Severity::High => "⚠️",
            Severity::Medium => "🔶",
            Severity::Low => "ℹ️",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle state. `Resolved` only exists for persisted threats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatStatus {
    Active,
    Blocked,
    Investigating,
    Resolved,
}

impl ThreatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatStatus::Active => "active",
            ThreatStatus::Blocked => "blocked",
            ThreatStatus::Investigating => "investigating",
            ThreatStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ThreatStatus::Active),
            "blocked" => Some(ThreatStatus::Blocked),
            "investigating" => Some(ThreatStatus::Investigating),
            "resolved" => Some(ThreatStatus::Resolved),
            _ => None,
        }
    }

    /// Statuses that stamp `resolved_at` when persisted
    pub fn closes(&self) -> bool {
        matches!(self, ThreatStatus::Blocked | ThreatStatus::Resolved)
    }
}

// ============================================================================
// THREAT
// ============================================================================

/// A synthesized security event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Threat {
    pub id: String,
    #[serde(rename = "type")]
    pub threat_type: ThreatType,
    pub severity: Severity,
    pub source: String,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub status: ThreatStatus,
    pub description: String,
    /// Originating request, when derived locally
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
