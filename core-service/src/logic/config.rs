//! Monitor Configuration
//!
//! Runtime configuration resolved once from the environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::constants;

/// Endpoint of the hosted functions (classification, alerts, ingestion)
#[derive(Debug, Clone)]
pub struct FunctionsConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            base_url: constants::get_functions_url(),
            api_key: constants::get_api_key(),
            timeout_seconds: 30,
        }
    }
}

impl FunctionsConfig {
    pub fn endpoint(&self, function: &str) -> String {
        format!("{}/{}", self.base_url, function)
    }

    /// Shared HTTP client with the configured timeout
    pub fn http_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_seconds))
            .build()
            .unwrap_or_default()
    }
}

/// Auto-analysis schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    pub auto_enabled: bool,
    pub interval_secs: u64,
    pub min_requests: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            auto_enabled: true,
            interval_secs: constants::DEFAULT_SCAN_INTERVAL_SECS,
            min_requests: constants::DEFAULT_MIN_REQUESTS,
        }
    }
}

impl ScanConfig {
    /// Interval is clamped to the supported range
    pub fn new(auto_enabled: bool, interval_secs: u64, min_requests: usize) -> Self {
        Self {
            auto_enabled,
            interval_secs: interval_secs
                .clamp(constants::MIN_SCAN_INTERVAL_SECS, constants::MAX_SCAN_INTERVAL_SECS),
            min_requests,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub page_host: String,
    pub functions: FunctionsConfig,
    pub data_dir: PathBuf,
    pub scan: ScanConfig,
    pub agent_enabled: bool,
    pub agent_interval_secs: u64,
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        Self {
            page_host: constants::get_page_host(),
            functions: FunctionsConfig::default(),
            data_dir: constants::get_data_dir(),
            scan: ScanConfig::new(
                constants::is_auto_analysis_enabled(),
                constants::get_scan_interval(),
                constants::get_min_requests(),
            ),
            agent_enabled: constants::is_agent_enabled(),
            agent_interval_secs: constants::get_agent_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_interval_clamped() {
        assert_eq!(ScanConfig::new(true, 5, 1).interval_secs, 15);
        assert_eq!(ScanConfig::new(true, 900, 1).interval_secs, 300);
        assert_eq!(ScanConfig::new(true, 60, 1).interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_endpoint_join() {
        let cfg = FunctionsConfig {
            base_url: "http://svc/functions/v1".into(),
            api_key: None,
            timeout_seconds: 5,
        };
        assert_eq!(cfg.endpoint("analyze-threat"), "http://svc/functions/v1/analyze-threat");
    }
}
