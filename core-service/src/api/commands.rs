//! Monitor Commands - Operator API
//!
//! `MonitorHandle` is the cloneable front door to a running engine. Each
//! call is a message with a oneshot reply; the engine task owns all state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::logic::aggregator::TrafficStats;
use crate::logic::ai_bridge::{AnalysisResult, BridgeError};
use crate::logic::alerts::{
    AlertChannelSettings, AlertDispatchResponse, AlertSettingsPatch, DispatchError, SettingsError,
};
use crate::logic::config::ScanConfig;
use crate::logic::history::ThreatHistoryStats;
use crate::logic::persistence::{StoreError, StoredThreat};
use crate::logic::threat::{Threat, ThreatStatus};
use crate::logic::traffic::ObservedRequest;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Monitor engine is not running")]
    EngineStopped,
    #[error("An analysis is already in progress")]
    AnalysisInProgress,
    #[error("No traffic captured yet")]
    NoRequests,
    #[error("History was cleared while the analysis was running")]
    Discarded,
    #[error("Enable at least one alert channel first")]
    NoChannelEnabled,
    #[error("Sign in required")]
    SignInRequired,
    #[error("Requires role: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub requests: Vec<ObservedRequest>,
    pub threats: Vec<Threat>,
    pub stats: TrafficStats,
    pub is_monitoring: bool,
    pub is_analyzing: bool,
    pub last_analysis: Option<AnalysisResult>,
    pub last_analysis_at: Option<DateTime<Utc>>,
    pub analysis_history: Vec<AnalysisResult>,
    /// `None` while auto-analysis is off or monitoring is paused
    pub seconds_until_next_scan: Option<u64>,
    pub scan: ScanConfig,
    pub alert_settings: AlertChannelSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistorySnapshot {
    pub threats: Vec<StoredThreat>,
    pub stats: ThreatHistoryStats,
}

type Reply<T> = oneshot::Sender<T>;

pub enum Command {
    ToggleMonitoring(Reply<bool>),
    BlockThreat(String, Reply<bool>),
    ClearHistory(Reply<()>),
    AnalyzeNow(Reply<Result<AnalysisResult, CommandError>>),
    UpdateAlertSettings(AlertSettingsPatch, Reply<Result<AlertChannelSettings, CommandError>>),
    SendTestAlert(Reply<Result<AlertDispatchResponse, CommandError>>),
    SetScanConfig(ScanConfig, Reply<ScanConfig>),
    Snapshot(Reply<MonitorSnapshot>),
    ThreatHistory(Reply<HistorySnapshot>),
    UpdateThreatStatus(String, ThreatStatus, Reply<Result<bool, CommandError>>),
    Shutdown,
}

// ============================================================================
// HANDLE
// ============================================================================

#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<Command>,
}

impl MonitorHandle {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CommandError::EngineStopped)?;
        rx.await.map_err(|_| CommandError::EngineStopped)
    }

    /// Pause or resume ingestion; returns the new state
    pub async fn toggle_monitoring(&self) -> Result<bool, CommandError> {
        self.request(Command::ToggleMonitoring).await
    }

    /// Idempotent; false when no buffered threat has this id
    pub async fn block_threat(&self, id: &str) -> Result<bool, CommandError> {
        let id = id.to_string();
        self.request(|reply| Command::BlockThreat(id, reply)).await
    }

    /// Empty both buffers, forget seen entries, drop any in-flight verdict
    pub async fn clear_history(&self) -> Result<(), CommandError> {
        self.request(Command::ClearHistory).await
    }

    /// Run a remote classification now and wait for the verdict
    pub async fn analyze_now(&self) -> Result<AnalysisResult, CommandError> {
        self.request(Command::AnalyzeNow).await?
    }

    pub async fn update_alert_settings(
        &self,
        patch: AlertSettingsPatch,
    ) -> Result<AlertChannelSettings, CommandError> {
        self.request(|reply| Command::UpdateAlertSettings(patch, reply)).await?
    }

    pub async fn send_test_alert(&self) -> Result<AlertDispatchResponse, CommandError> {
        self.request(Command::SendTestAlert).await?
    }

    /// Returns the applied (clamped) configuration
    pub async fn set_scan_config(
        &self,
        auto_enabled: bool,
        interval_secs: u64,
        min_requests: usize,
    ) -> Result<ScanConfig, CommandError> {
        let config = ScanConfig::new(auto_enabled, interval_secs, min_requests);
        self.request(|reply| Command::SetScanConfig(config, reply)).await
    }

    pub async fn snapshot(&self) -> Result<MonitorSnapshot, CommandError> {
        self.request(Command::Snapshot).await
    }

    pub async fn threat_history(&self) -> Result<HistorySnapshot, CommandError> {
        self.request(Command::ThreatHistory).await
    }

    /// Admin or analyst only; false when no stored threat has this id
    pub async fn update_threat_status(&self, id: &str, status: ThreatStatus) -> Result<bool, CommandError> {
        let id = id.to_string();
        self.request(|reply| Command::UpdateThreatStatus(id, status, reply)).await?
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}
