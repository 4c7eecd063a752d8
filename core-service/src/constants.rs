//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! To change the default functions endpoint, only edit this file.

/// Default functions base URL
///
/// For development: http://localhost:8080/functions/v1
pub const DEFAULT_FUNCTIONS_URL: &str = "http://localhost:8080/functions/v1";

/// Host the monitored page is served from
pub const DEFAULT_PAGE_HOST: &str = "localhost";

/// Default auto-analysis interval (seconds)
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;

/// Auto-analysis interval bounds (seconds)
pub const MIN_SCAN_INTERVAL_SECS: u64 = 15;
pub const MAX_SCAN_INTERVAL_SECS: u64 = 300;

/// Minimum buffered requests before an automatic analysis fires
pub const DEFAULT_MIN_REQUESTS: usize = 5;

/// Default host agent reporting interval (seconds)
pub const DEFAULT_AGENT_INTERVAL_SECS: u64 = 10;

/// Agent id stamped on persisted threats when nobody is signed in
pub const BROWSER_AGENT_ID: &str = "browser-agent";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "Sentinel";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get functions base URL from environment or use default
pub fn get_functions_url() -> String {
    std::env::var("SENTINEL_FUNCTIONS_URL")
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| DEFAULT_FUNCTIONS_URL.to_string())
}

/// Get the page host from environment or use default
pub fn get_page_host() -> String {
    std::env::var("SENTINEL_PAGE_HOST")
        .unwrap_or_else(|_| DEFAULT_PAGE_HOST.to_string())
}

/// Get optional bearer key for the functions endpoint
pub fn get_api_key() -> Option<String> {
    std::env::var("SENTINEL_API_KEY").ok().filter(|s| !s.is_empty())
}

/// Get auto-analysis interval, clamped to the supported range
pub fn get_scan_interval() -> u64 {
    std::env::var("SENTINEL_SCAN_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SCAN_INTERVAL_SECS)
        .clamp(MIN_SCAN_INTERVAL_SECS, MAX_SCAN_INTERVAL_SECS)
}

/// Get minimum request count for automatic analysis
pub fn get_min_requests() -> usize {
    std::env::var("SENTINEL_MIN_REQUESTS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_MIN_REQUESTS)
}

/// Check if automatic analysis is enabled
pub fn is_auto_analysis_enabled() -> bool {
    env_flag("SENTINEL_AUTO_ANALYSIS", true)
}

/// Check if the host metrics agent is enabled
pub fn is_agent_enabled() -> bool {
    env_flag("SENTINEL_AGENT_ENABLED", false)
}

/// Get optional shared key sent as `x-agent-key` by the host agent
pub fn get_agent_key() -> Option<String> {
    std::env::var("SENTINEL_AGENT_KEY").ok().filter(|s| !s.is_empty())
}

/// Get host agent id, defaulting to one derived from the hostname
pub fn get_agent_id(hostname: &str) -> String {
    std::env::var("SENTINEL_AGENT_ID")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("agent-{}", hostname.to_lowercase()))
}

/// Get host agent reporting interval
pub fn get_agent_interval() -> u64 {
    std::env::var("SENTINEL_AGENT_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_AGENT_INTERVAL_SECS)
}

/// Get data directory (settings file, threat database)
pub fn get_data_dir() -> std::path::PathBuf {
    std::env::var("SENTINEL_DATA_DIR")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join("sentinel")
        })
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|s| s.to_lowercase() != "false" && s != "0")
        .unwrap_or(default)
}
