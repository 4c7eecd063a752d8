//! Traffic Types
//!
//! Data structures for observed network transfers.
//! No scoring logic lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

// ============================================================================
// RAW OBSERVATION
// ============================================================================

/// One resource-timing entry as delivered by the observation feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
    /// Requested URL
    pub name: String,
    /// Offset from the time origin (ms)
    pub start_time: f64,
    /// Total duration (ms)
    #[serde(default)]
    pub duration: f64,
    /// Bytes on the wire; absent for cached or opaque responses
    #[serde(default)]
    pub transfer_size: Option<u64>,
    /// script, fetch, img, xmlhttprequest, ...
    #[serde(default)]
    pub initiator_type: String,
    #[serde(default = "default_entry_type")]
    pub entry_type: String,
}

fn default_entry_type() -> String {
    "resource".to_string()
}

impl ResourceTiming {
    pub fn new(name: &str, start_time: f64, initiator_type: &str) -> Self {
        Self {
            name: name.to_string(),
            start_time,
            duration: 0.0,
            transfer_size: None,
            initiator_type: initiator_type.to_string(),
            entry_type: default_entry_type(),
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_transfer_size(mut self, bytes: u64) -> Self {
        self.transfer_size = Some(bytes);
        self
    }

    pub fn transfer_bytes(&self) -> u64 {
        self.transfer_size.unwrap_or(0)
    }
}

// ============================================================================
// PROTOCOL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
    Ws,
    Wss,
    Other,
}

impl Protocol {
    /// Derive protocol from the URL scheme; unparsable URLs are `Other`
    pub fn from_url(url: &str) -> Self {
        match reqwest::Url::parse(url) {
            Ok(parsed) => match parsed.scheme() {
                "https" => Protocol::Https,
                "http" => Protocol::Http,
                "wss" => Protocol::Wss,
                "ws" => Protocol::Ws,
                _ => Protocol::Other,
            },
            Err(_) => Protocol::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Ws => "WS",
            Protocol::Wss => "WSS",
            Protocol::Other => "OTHER",
        }
    }
}

/// Host of a URL, or `"unknown"` when it cannot be parsed
pub fn domain_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

// ============================================================================
// REQUEST STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Normal,
    Suspicious,
    Blocked,
}

impl RequestStatus {
    /// Three-tier mapping: >70 blocked, 51..=70 suspicious, else normal
    pub fn from_score(score: u8) -> Self {
        use super::rules::{BLOCKED_MIN_SCORE, SUSPICIOUS_MIN_SCORE};

        if score >= BLOCKED_MIN_SCORE {
            RequestStatus::Blocked
        } else if score >= SUSPICIOUS_MIN_SCORE {
            RequestStatus::Suspicious
        } else {
            RequestStatus::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Normal => "normal",
            RequestStatus::Suspicious => "suspicious",
            RequestStatus::Blocked => "blocked",
        }
    }
}

// ============================================================================
// RISK REASONS
// ============================================================================

/// One matched scoring rule. Renders to the human-readable reason string.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskReason {
    /// URL matched a tracking/analytics/beacon-like pattern
    SuspiciousPattern(&'static str),
    /// Host is neither allow-listed nor the page's own host
    UntrustedDomain,
    LargeTransfer { bytes: u64 },
    SlowRequest { duration_ms: f64 },
    ThirdPartyScript,
    ExternalApiCall,
}

impl RiskReason {
    /// Points this rule contributes to the risk score
    pub fn points(&self) -> u32 {
        use super::rules::*;

        match self {
            RiskReason::SuspiciousPattern(_) => PATTERN_POINTS,
            RiskReason::UntrustedDomain => UNTRUSTED_DOMAIN_POINTS,
            RiskReason::LargeTransfer { .. } => LARGE_TRANSFER_POINTS,
            RiskReason::SlowRequest { .. } => SLOW_REQUEST_POINTS,
            RiskReason::ThirdPartyScript => THIRD_PARTY_SCRIPT_POINTS,
            RiskReason::ExternalApiCall => EXTERNAL_API_POINTS,
        }
    }
}

impl std::fmt::Display for RiskReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskReason::SuspiciousPattern(p) => write!(f, "URL matches suspicious pattern: {}", p),
            RiskReason::UntrustedDomain => write!(f, "External domain not in trusted list"),
            RiskReason::LargeTransfer { bytes } => {
                write!(f, "Large data transfer: {:.1}KB", *bytes as f64 / 1024.0)
            }
            RiskReason::SlowRequest { duration_ms } => {
                write!(f, "Slow request: {:.1}s", duration_ms / 1000.0)
            }
            RiskReason::ThirdPartyScript => write!(f, "Third-party script execution"),
            RiskReason::ExternalApiCall => write!(f, "API call to external domain"),
        }
    }
}

impl Serialize for RiskReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// OBSERVED REQUEST
// ============================================================================

/// Canonical record of one unique network transfer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedRequest {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub domain: String,
    pub protocol: Protocol,
    /// The timing feed does not expose the method
    pub method: String,
    pub initiator_type: String,
    pub duration_ms: f64,
    pub transfer_bytes: u64,
    pub status: RequestStatus,
    pub risk_score: u8,
    pub risk_reasons: Vec<RiskReason>,
}

impl ObservedRequest {
    pub fn reason_strings(&self) -> Vec<String> {
        self.risk_reasons.iter().map(|r| r.to_string()).collect()
    }

    /// Operator override; the only mutation allowed after creation
    pub fn force_block(&mut self) {
        self.status = RequestStatus::Blocked;
    }
}
