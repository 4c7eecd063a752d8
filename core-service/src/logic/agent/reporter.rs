//! Agent Reporter
//!
//! Periodically posts host samples to the `system-metrics` function.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;

use super::collect::{AgentPayload, HostCollector};
use crate::logic::config::FunctionsConfig;

pub const FUNCTION_NAME: &str = "system-metrics";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Ingestion rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProcessedCounts {
    #[serde(default)]
    pub metrics: bool,
    #[serde(default)]
    pub processes: usize,
    #[serde(default)]
    pub threats: usize,
}

/// `{ success, message, processed }`
#[derive(Debug, Clone, Deserialize)]
pub struct IngestAck {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub processed: ProcessedCounts,
}

pub struct AgentReporter {
    collector: HostCollector,
    http_client: reqwest::Client,
    endpoint: String,
    agent_key: Option<String>,
    interval: Duration,
}

impl AgentReporter {
    pub fn new(
        collector: HostCollector,
        functions: &FunctionsConfig,
        agent_key: Option<String>,
        interval_secs: u64,
    ) -> Self {
        Self {
            collector,
            http_client: functions.http_client(),
            endpoint: functions.endpoint(FUNCTION_NAME),
            agent_key,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    pub async fn send(&self, payload: &AgentPayload) -> Result<IngestAck, AgentError> {
        let mut request = self.http_client.post(&self.endpoint).json(payload);
        if let Some(key) = &self.agent_key {
            request = request.header("x-agent-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| AgentError::InvalidResponse(e.to_string()))
        } else {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            Err(AgentError::Rejected {
                status: status.as_u16(),
                message: body["error"].as_str().unwrap_or("unknown error").to_string(),
            })
        }
    }

    /// Report until `shutdown` flips to true. Failures are logged and retried next tick.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "[Agent] Reporting as {} every {}s to {}",
            self.collector.agent_id(),
            self.interval.as_secs(),
            self.endpoint
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let payload = self.collector.collect();
                    match self.send(&payload).await {
                        Ok(ack) => log::debug!(
                            "[Agent] {} ({} processes, {} threats)",
                            ack.message,
                            ack.processed.processes,
                            ack.processed.threats
                        ),
                        Err(e) => log::warn!("[Agent] Report failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("[Agent] Reporter stopped");
    }
}
