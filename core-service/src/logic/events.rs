//! Event Emitter - Monitor Event Bus
//!
//! Fan-out of engine activity to any number of listeners.

use serde::Serialize;
use tokio::sync::broadcast;

use super::aggregator::TrafficStats;
use super::ai_bridge::AnalysisResult;
use super::threat::Threat;
use super::traffic::ObservedRequest;

/// Buffered events per subscriber before lagging
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum MonitorEvent {
    RequestObserved(ObservedRequest),
    ThreatDetected(Threat),
    StatsUpdated(TrafficStats),
    AnalysisCompleted(AnalysisResult),
    AlertSent { threat_id: Option<String>, channels: String },
    /// Transient operator-facing message
    Notice {
        level: NoticeLevel,
        title: String,
        message: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Emit to all listeners; dropped silently when nobody listens
    pub fn emit(&self, event: MonitorEvent) {
        let _ = self.tx.send(event);
    }

    pub fn notice(&self, level: NoticeLevel, title: &str, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Info => log::info!("[TrafficMonitor] {}: {}", title, message),
            NoticeLevel::Warning => log::warn!("[TrafficMonitor] {}: {}", title, message),
            NoticeLevel::Error => log::error!("[TrafficMonitor] {}: {}", title, message),
        }
        self.emit(MonitorEvent::Notice {
            level,
            title: title.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_listeners_is_ok() {
        let bus = EventBus::new();
        bus.emit(MonitorEvent::StatsUpdated(TrafficStats::default()));
    }

    #[tokio::test]
    async fn test_notice_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.notice(NoticeLevel::Warning, "Analysis failed", "Rate limit exceeded");

        match rx.recv().await.unwrap() {
            MonitorEvent::Notice { level, title, .. } => {
                assert_eq!(level, NoticeLevel::Warning);
                assert_eq!(title, "Analysis failed");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(MonitorEvent::AlertSent {
            threat_id: Some("t-1".into()),
            channels: "email".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "alert_sent");
        assert_eq!(json["payload"]["channels"], "email");
    }
}
