//! Engine scenario tests
//!
//! Drive a real engine through its handle with in-test classification and
//! alert services, an in-memory store and a temp data dir.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc, Notify};

use super::*;
use crate::logic::ai_bridge::{AnalyzeRequest, ThreatAnalysis};
use crate::logic::alerts::{DispatchResults, ThreatAlertRequest};
use crate::logic::config::FunctionsConfig;
use crate::logic::identity::{StaticIdentity, User};
use crate::logic::persistence::{ChangeEvent, SqliteThreatStore};
use crate::logic::threat::ThreatType;

// ============================================================================
// TEST SERVICES
// ============================================================================

struct MockClassifier {
    calls: AtomicUsize,
    verdict: Mutex<Result<ThreatAnalysis, ()>>,
    /// When set, each call waits for one permit before answering
    gate: Option<Arc<Notify>>,
}

impl MockClassifier {
    fn answering(verdict: ThreatAnalysis) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            verdict: Mutex::new(Ok(verdict)),
            gate: None,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            verdict: Mutex::new(Err(())),
            gate: None,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClassificationService for MockClassifier {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisResult, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let verdict = self.verdict.lock().clone();
        match verdict {
            Ok(analysis) => Ok(AnalysisResult {
                success: true,
                analysis,
                packets_analyzed: request.packets.len(),
                timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            }),
            Err(()) => Err(BridgeError::RateLimited),
        }
    }
}

#[derive(Default)]
struct MockDispatcher {
    sent: Mutex<Vec<ThreatAlertRequest>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MockDispatcher {
    fn sent(&self) -> Vec<ThreatAlertRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl AlertDispatcher for MockDispatcher {
    async fn dispatch(&self, request: &ThreatAlertRequest) -> Result<AlertDispatchResponse, DispatchError> {
        self.sent.lock().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::Network("connection refused".into()));
        }
        Ok(AlertDispatchResponse {
            success: true,
            results: DispatchResults {
                email: Some(serde_json::json!({"id": "email-1"})),
                sms: None,
                errors: Vec::new(),
            },
            message: Some("Alerts sent successfully".into()),
        })
    }
}

// ============================================================================
// HARNESS
// ============================================================================

struct Harness {
    handle: MonitorHandle,
    inbound: mpsc::Sender<ResourceTiming>,
    events: broadcast::Receiver<MonitorEvent>,
    store: Arc<SqliteThreatStore>,
    classifier: Arc<MockClassifier>,
    dispatcher: Arc<MockDispatcher>,
    identity: Arc<StaticIdentity>,
    _dir: TempDir,
}

impl Harness {
    async fn start(classifier: MockClassifier, scan: ScanConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let config = MonitorConfig {
            page_host: "localhost".into(),
            functions: FunctionsConfig {
                base_url: "http://127.0.0.1:9".into(),
                api_key: None,
                timeout_seconds: 1,
            },
            data_dir: dir.path().to_path_buf(),
            scan,
            agent_enabled: false,
            agent_interval_secs: 10,
        };

        let store = Arc::new(SqliteThreatStore::open_memory().unwrap());
        let classifier = Arc::new(classifier);
        let dispatcher = Arc::new(MockDispatcher::default());
        let identity = Arc::new(StaticIdentity::anonymous());
        let services = Services {
            store: store.clone(),
            classifier: classifier.clone(),
            dispatcher: dispatcher.clone(),
            identity: identity.clone(),
        };

        let bus = EventBus::new();
        let events = bus.subscribe();
        let (engine, handle, inbound) = Engine::new(&config, services, bus).await.unwrap();
        engine.spawn();

        Self {
            handle,
            inbound,
            events,
            store,
            classifier,
            dispatcher,
            identity,
            _dir: dir,
        }
    }

    async fn send(&self, entry: ResourceTiming) {
        self.inbound.send(entry).await.unwrap();
    }

    /// Wait for the first event matching `pred`
    async fn wait_for(&mut self, pred: impl Fn(&MonitorEvent) -> bool) -> MonitorEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match self.events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event bus closed: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn enable_email_alerts(&self) {
        self.handle
            .update_alert_settings(AlertSettingsPatch {
                email_enabled: Some(true),
                email_address: Some("soc@example.org".into()),
                alert_on_high: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
    }
}

fn manual() -> ScanConfig {
    ScanConfig::new(false, 30, 5)
}

fn clean_verdict() -> ThreatAnalysis {
    ThreatAnalysis {
        is_threat: false,
        threat_type: None,
        severity: None,
        confidence: 0.2,
        description: "Normal traffic".into(),
        recommendation: "None".into(),
        indicators: vec![],
    }
}

fn malware_verdict() -> ThreatAnalysis {
    ThreatAnalysis {
        is_threat: true,
        threat_type: Some(ThreatType::Malware),
        severity: Some(Severity::Critical),
        confidence: 0.93,
        description: "Beaconing to known C2 host".into(),
        recommendation: "Isolate the host".into(),
        indicators: vec!["periodic POST".into()],
    }
}

/// Untrusted 150 KB fetch: score 60, high exfiltration
fn exfil(path: &str, start: f64) -> ResourceTiming {
    ResourceTiming::new(&format!("https://evil.example.net/{path}"), start, "fetch")
        .with_transfer_size(150_000)
}

fn benign(n: u32) -> ResourceTiming {
    ResourceTiming::new(&format!("https://localhost/app/{n}.js"), n as f64, "script")
}

fn is_alert_sent(e: &MonitorEvent) -> bool {
    matches!(e, MonitorEvent::AlertSent { .. })
}

fn is_notice(title: &'static str) -> impl Fn(&MonitorEvent) -> bool {
    move |e| matches!(e, MonitorEvent::Notice { title: t, .. } if t == title)
}

// ============================================================================
// INGESTION
// ============================================================================

#[tokio::test]
async fn test_exfiltration_scenario() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    h.send(exfil("upload", 10.0)).await;

    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(snap.requests.len(), 1);
    assert_eq!(snap.requests[0].risk_score, 60);
    assert_eq!(snap.requests[0].status.as_str(), "suspicious");

    assert_eq!(snap.threats.len(), 1);
    let threat = &snap.threats[0];
    assert_eq!(threat.threat_type, ThreatType::DataExfiltration);
    assert_eq!(threat.severity, Severity::High);
    assert_eq!(threat.source, "evil.example.net");
    assert_eq!(threat.target, "localhost");
    assert_eq!(threat.request_id.as_deref(), Some(snap.requests[0].id.as_str()));

    assert_eq!(snap.stats.total_requests, 1);
    assert_eq!(snap.stats.suspicious_requests, 1);
    assert_eq!(snap.stats.threats_detected, 1);
}

#[tokio::test]
async fn test_duplicates_and_benign_traffic() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    h.send(benign(1)).await;
    h.send(benign(1)).await;
    h.send(benign(2)).await;

    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(snap.requests.len(), 2);
    assert!(snap.threats.is_empty());
    // newest first
    assert!(snap.requests[0].url.ends_with("/2.js"));
}

#[tokio::test]
async fn test_paused_entries_are_not_marked_seen() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;

    assert!(!h.handle.toggle_monitoring().await.unwrap());
    h.send(benign(1)).await;
    assert_eq!(h.handle.snapshot().await.unwrap().requests.len(), 0);

    assert!(h.handle.toggle_monitoring().await.unwrap());
    h.send(benign(1)).await;
    let snap = h.handle.snapshot().await.unwrap();
    assert!(snap.is_monitoring);
    assert_eq!(snap.requests.len(), 1);
}

#[tokio::test]
async fn test_block_and_clear() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    h.send(exfil("upload", 1.0)).await;

    let snap = h.handle.snapshot().await.unwrap();
    let id = snap.threats[0].id.clone();
    assert!(h.handle.block_threat(&id).await.unwrap());
    assert!(h.handle.block_threat(&id).await.unwrap());
    assert!(!h.handle.block_threat("missing").await.unwrap());

    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(snap.threats[0].status, ThreatStatus::Blocked);
    assert_eq!(snap.stats.blocked_requests, 1);

    h.handle.clear_history().await.unwrap();
    let snap = h.handle.snapshot().await.unwrap();
    assert!(snap.requests.is_empty() && snap.threats.is_empty());

    // Dedup state is gone too
    h.send(exfil("upload", 1.0)).await;
    assert_eq!(h.handle.snapshot().await.unwrap().requests.len(), 1);
}

#[tokio::test]
async fn test_threat_is_persisted_with_same_id() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    let mut changes = h.store.subscribe();
    h.send(exfil("upload", 1.0)).await;

    let stored = match tokio::time::timeout(Duration::from_secs(5), changes.recv()).await {
        Ok(Ok(ChangeEvent::Inserted(row))) => row,
        other => panic!("expected insert, got {other:?}"),
    };
    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(stored.id, snap.threats[0].id);
    assert_eq!(stored.agent_id, "browser-agent");
    assert_eq!(stored.threat_type, "data_exfiltration");
    assert_eq!(stored.source_ip.as_deref(), Some("evil.example.net"));
}

#[tokio::test]
async fn test_block_right_after_detection_reaches_store() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    let mut changes = h.store.subscribe();
    h.send(exfil("upload", 1.0)).await;

    let id = h.handle.snapshot().await.unwrap().threats[0].id.clone();
    assert!(h.handle.block_threat(&id).await.unwrap());

    let mut saw_insert = false;
    let blocked = loop {
        match tokio::time::timeout(Duration::from_secs(5), changes.recv()).await {
            Ok(Ok(ChangeEvent::Inserted(row))) if row.id == id => saw_insert = true,
            Ok(Ok(ChangeEvent::Updated(row))) if row.id == id => break row,
            Ok(Ok(_)) => {}
            other => panic!("expected stored block, got {other:?}"),
        }
    };
    assert!(saw_insert);
    assert_eq!(blocked.status, ThreatStatus::Blocked);
}

// ============================================================================
// ALERTS
// ============================================================================

#[tokio::test]
async fn test_high_threat_alerts_once_per_cooldown() {
    let mut h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    h.enable_email_alerts().await;

    h.send(exfil("a", 1.0)).await;
    h.wait_for(is_alert_sent).await;

    h.send(exfil("b", 2.0)).await;
    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(snap.threats.len(), 2);

    let sent = h.dispatcher.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].threat_type, "Data Exfiltration");
    assert_eq!(sent[0].severity, Severity::High);
    assert_eq!(sent[0].channels.email.as_ref().map(|c| c.to.as_str()), Some("soc@example.org"));
    assert!(sent[0].channels.sms.is_none());
}

#[tokio::test]
async fn test_severity_filter_and_disabled_channels() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;

    // Channels disabled: nothing goes out even for critical
    h.send(
        ResourceTiming::new("https://evil.example.net/tracking/upload", 1.0, "fetch")
            .with_transfer_size(150_000),
    )
    .await;
    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(snap.threats[0].severity, Severity::Critical);

    // Email on, but high not opted in by default
    h.handle
        .update_alert_settings(AlertSettingsPatch {
            email_enabled: Some(true),
            email_address: Some("soc@example.org".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    h.send(exfil("b", 2.0)).await;
    h.handle.snapshot().await.unwrap();

    assert!(h.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn test_failed_dispatch_releases_cooldown() {
    let mut h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    h.enable_email_alerts().await;
    h.dispatcher.fail.store(true, Ordering::SeqCst);

    h.send(exfil("a", 1.0)).await;
    h.wait_for(is_notice("Alert failed")).await;

    h.dispatcher.fail.store(false, Ordering::SeqCst);
    h.send(exfil("b", 2.0)).await;
    h.wait_for(is_alert_sent).await;

    assert_eq!(h.dispatcher.sent().len(), 2);
}

#[tokio::test]
async fn test_test_alert_needs_channel_and_skips_cooldown() {
    let mut h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    assert!(matches!(
        h.handle.send_test_alert().await,
        Err(CommandError::NoChannelEnabled)
    ));

    h.enable_email_alerts().await;
    let response = h.handle.send_test_alert().await.unwrap();
    assert!(response.success);
    assert_eq!(h.dispatcher.sent()[0].threat_type, "Test Alert");

    // A real critical-severity test alert did not start a cooldown for high
    h.send(exfil("a", 1.0)).await;
    h.wait_for(|e| matches!(e, MonitorEvent::AlertSent { threat_id: Some(_), .. })).await;
    assert_eq!(h.dispatcher.sent().len(), 2);
}

#[tokio::test]
async fn test_alert_settings_persist_to_data_dir() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    let saved = h
        .handle
        .update_alert_settings(AlertSettingsPatch {
            cooldown_minutes: Some(15),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(saved.cooldown_minutes, 15);

    let reopened = SettingsStore::open(h._dir.path());
    assert_eq!(reopened.get().cooldown_minutes, 15);
    assert_eq!(h.handle.snapshot().await.unwrap().alert_settings.cooldown_minutes, 15);
}

// ============================================================================
// REMOTE CLASSIFICATION
// ============================================================================

#[tokio::test]
async fn test_manual_analysis_needs_traffic() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    assert!(matches!(h.handle.analyze_now().await, Err(CommandError::NoRequests)));
    assert_eq!(h.classifier.calls(), 0);
}

#[tokio::test]
async fn test_positive_verdict_becomes_threat() {
    let h = Harness::start(MockClassifier::answering(malware_verdict()), manual()).await;
    h.send(benign(1)).await;
    h.send(ResourceTiming::new("https://cdn.other.io/lib.js", 2.0, "script")).await;

    let result = h.handle.analyze_now().await.unwrap();
    assert_eq!(result.packets_analyzed, 2);

    let snap = h.handle.snapshot().await.unwrap();
    let threat = snap
        .threats
        .iter()
        .find(|t| t.threat_type == ThreatType::Malware)
        .expect("AI threat buffered");
    assert_eq!(threat.description, "[AI] Beaconing to known C2 host");
    assert_eq!(threat.source, "cdn.other.io");
    assert_eq!(threat.target, "localhost");
    assert!(threat.request_id.is_none());

    assert!(!snap.is_analyzing);
    assert_eq!(snap.analysis_history.len(), 1);
    assert!(snap.last_analysis.is_some() && snap.last_analysis_at.is_some());
}

#[tokio::test]
async fn test_classifier_failure_is_reported() {
    let mut h = Harness::start(MockClassifier::failing(), manual()).await;
    h.send(benign(1)).await;

    let err = h.handle.analyze_now().await.unwrap_err();
    assert!(matches!(err, CommandError::Bridge(BridgeError::RateLimited)));
    h.wait_for(is_notice("AI analysis unavailable")).await;

    // Local scoring keeps working
    h.send(exfil("a", 2.0)).await;
    assert_eq!(h.handle.snapshot().await.unwrap().threats.len(), 1);
}

#[tokio::test]
async fn test_single_flight_and_clear_discards_verdict() {
    let gate = Arc::new(Notify::new());
    let classifier = MockClassifier {
        gate: Some(gate.clone()),
        ..MockClassifier::answering(malware_verdict())
    };
    let h = Harness::start(classifier, manual()).await;
    h.send(benign(1)).await;

    let first = {
        let handle = h.handle.clone();
        tokio::spawn(async move { handle.analyze_now().await })
    };
    while !h.handle.snapshot().await.unwrap().is_analyzing {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        h.handle.analyze_now().await,
        Err(CommandError::AnalysisInProgress)
    ));

    h.handle.clear_history().await.unwrap();
    gate.notify_one();

    assert!(matches!(first.await.unwrap(), Err(CommandError::Discarded)));
    let snap = h.handle.snapshot().await.unwrap();
    assert!(snap.threats.is_empty());
    assert!(snap.analysis_history.is_empty());
    assert_eq!(h.classifier.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auto_analysis_respects_minimum() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), ScanConfig::new(true, 15, 2)).await;

    h.send(benign(1)).await;
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(h.classifier.calls(), 0);

    h.send(benign(2)).await;
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(h.classifier.calls(), 1);
    assert_eq!(h.handle.snapshot().await.unwrap().analysis_history.len(), 1);
}

#[tokio::test]
async fn test_scan_config_reschedules() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    assert_eq!(h.handle.snapshot().await.unwrap().seconds_until_next_scan, None);

    let applied = h.handle.set_scan_config(true, 5, 3).await.unwrap();
    assert_eq!(applied.interval_secs, 15);

    let snap = h.handle.snapshot().await.unwrap();
    let remaining = snap.seconds_until_next_scan.expect("scheduled");
    assert!(remaining <= 15);

    h.handle.toggle_monitoring().await.unwrap();
    assert_eq!(h.handle.snapshot().await.unwrap().seconds_until_next_scan, None);
}

// ============================================================================
// STORED HISTORY
// ============================================================================

#[tokio::test]
async fn test_status_update_requires_triage_role() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    let mut changes = h.store.subscribe();
    h.send(exfil("a", 1.0)).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), changes.recv()).await;

    let id = h.handle.snapshot().await.unwrap().threats[0].id.clone();

    assert!(matches!(
        h.handle.update_threat_status(&id, ThreatStatus::Resolved).await,
        Err(CommandError::SignInRequired)
    ));

    let user = User { id: "u-7".into(), email: "v@example.org".into() };
    h.identity.sign_in(user.clone(), vec![Role::Viewer]);
    match h.handle.update_threat_status(&id, ThreatStatus::Resolved).await {
        Err(CommandError::Forbidden(required)) => assert_eq!(required, "admin or analyst"),
        other => panic!("expected forbidden, got {other:?}"),
    }

    h.identity.sign_in(user, vec![Role::Analyst]);
    assert!(h.handle.update_threat_status(&id, ThreatStatus::Resolved).await.unwrap());
    assert!(!h.handle.update_threat_status("missing", ThreatStatus::Resolved).await.unwrap());

    let history = h.handle.threat_history().await.unwrap();
    assert_eq!(history.stats.total, 1);
    assert_eq!(history.stats.resolved, 1);
    assert_eq!(history.threats[0].status, ThreatStatus::Resolved);
}

#[tokio::test]
async fn test_shutdown_stops_engine() {
    let h = Harness::start(MockClassifier::answering(clean_verdict()), manual()).await;
    h.handle.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(h.handle.snapshot().await, Err(CommandError::EngineStopped)));
}
