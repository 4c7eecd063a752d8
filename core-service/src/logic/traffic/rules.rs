//! Traffic Scoring Rules & Thresholds
//!
//! Point values, patterns and the trust allow-list.
//! No classify logic here - only constants and config.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// POINTS (additive, capped at MAX_RISK_SCORE)
// ============================================================================

pub const PATTERN_POINTS: u32 = 20;
pub const UNTRUSTED_DOMAIN_POINTS: u32 = 15;
pub const LARGE_TRANSFER_POINTS: u32 = 25;
pub const SLOW_REQUEST_POINTS: u32 = 10;
pub const THIRD_PARTY_SCRIPT_POINTS: u32 = 15;
pub const EXTERNAL_API_POINTS: u32 = 20;

pub const MAX_RISK_SCORE: u32 = 100;

// ============================================================================
// RULE THRESHOLDS
// ============================================================================

/// Transfers above this many bytes count as large
pub const LARGE_TRANSFER_BYTES: u64 = 100_000;

/// Requests slower than this (ms) count as slow
pub const SLOW_REQUEST_MS: f64 = 5_000.0;

// ============================================================================
// STATUS / THREAT THRESHOLDS
// ============================================================================

/// At or above this score a request is suspicious
pub const SUSPICIOUS_MIN_SCORE: u8 = 51;

/// At or above this score a request is blocked
pub const BLOCKED_MIN_SCORE: u8 = 71;

/// Requests scoring below this never become threats
pub const THREAT_MIN_SCORE: u8 = 30;

// ============================================================================
// PATTERNS
// ============================================================================

/// Tracking/analytics/beacon-like URL fragments, matched case-insensitively
pub const SUSPICIOUS_PATTERNS: [&str; 6] = [
    "tracking",
    "analytics",
    "pixel",
    "beacon",
    "collect",
    "telemetry",
];

pub(crate) static PATTERN_REGEXES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    SUSPICIOUS_PATTERNS
        .iter()
        .filter_map(|p| {
            Regex::new(&format!("(?i){}", regex::escape(p)))
                .ok()
                .map(|re| (*p, re))
        })
        .collect()
});

/// Default allow-list; a host containing any entry is trusted
pub const TRUSTED_DOMAINS: [&str; 5] = [
    "supabase.co",
    "lovable.app",
    "localhost",
    "fonts.googleapis.com",
    "fonts.gstatic.com",
];

// ============================================================================
// TRUST POLICY
// ============================================================================

/// Decides whether a host is trusted for scoring purposes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustPolicy {
    pub trusted_domains: Vec<String>,
    /// Host the monitored page is served from
    pub page_host: String,
}

impl TrustPolicy {
    pub fn new(page_host: &str) -> Self {
        Self {
            trusted_domains: TRUSTED_DOMAINS.iter().map(|d| d.to_string()).collect(),
            page_host: page_host.to_string(),
        }
    }

    /// Add an extra allow-list entry
    pub fn with_trusted(mut self, domain: &str) -> Self {
        self.trusted_domains.push(domain.to_string());
        self
    }

    pub fn is_allow_listed(&self, domain: &str) -> bool {
        self.trusted_domains.iter().any(|t| domain.contains(t.as_str()))
    }

    pub fn is_own_host(&self, domain: &str) -> bool {
        !self.page_host.is_empty() && domain.contains(self.page_host.as_str())
    }

    /// Trusted = allow-listed or served from the page's own host
    pub fn is_trusted(&self, domain: &str) -> bool {
        self.is_allow_listed(domain) || self.is_own_host(domain)
    }
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_PAGE_HOST)
    }
}
