//! Monitor Engine - Event Loop
//!
//! Single task that owns every piece of monitoring state: normalizer and
//! buffers, alert cooldowns, settings, timers and the threat history.
//! Everything else talks to it through channels:
//!
//! - raw entries arrive on the inbound channel (drained per wake-up)
//! - timer ticks arrive from `TimerSet`
//! - operator commands arrive from `MonitorHandle`
//! - remote calls (classification, alert dispatch) run as spawned tasks
//!   and report back on an internal channel

#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::aggregator::Aggregator;
use super::ai_bridge::{analysis_to_threat, analyze_batch, AnalysisResult, BridgeError, ClassificationService, MAX_BATCH};
use super::alerts::{
    self, AlertChannelSettings, AlertDecision, AlertDispatchResponse, AlertDispatcher,
    AlertSettingsPatch, CooldownState, DispatchError, PendingAlerts, SettingsStore, ThreatAlertRequest,
};
use super::analysis_loop::{Tick, TimerKind, TimerSet, STATS_REFRESH_INTERVAL};
use super::config::{MonitorConfig, ScanConfig};
use super::events::{EventBus, MonitorEvent, NoticeLevel};
use super::history::ThreatHistory;
use super::identity::{agent_id_for, Access, IdentityProvider, Role, RouteGuard};
use super::persistence::{NewThreatRecord, StoreError, ThreatPatch, ThreatStore};
use super::threat::{synthesize, Severity, Threat, ThreatStatus};
use super::traffic::{Normalizer, ObservedRequest, ResourceTiming, TrustPolicy};
use crate::api::commands::{Command, CommandError, HistorySnapshot, MonitorHandle, MonitorSnapshot};

/// Raw entries buffered between the source and the engine
pub const INBOUND_CAPACITY: usize = 1024;
const COMMAND_CAPACITY: usize = 64;
const INTERNAL_CAPACITY: usize = 64;
const TICK_CAPACITY: usize = 16;

/// Analysis results kept for the snapshot
pub const ANALYSIS_HISTORY_LIMIT: usize = 50;

/// Roles allowed to change a stored threat's status
pub const TRIAGE_ROLES: [Role; 2] = [Role::Admin, Role::Analyst];

// ============================================================================
// WIRING
// ============================================================================

/// External collaborators, all behind traits
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn ThreatStore>,
    pub classifier: Arc<dyn ClassificationService>,
    pub dispatcher: Arc<dyn AlertDispatcher>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Results of spawned remote calls
enum Internal {
    AnalysisFinished {
        generation: u64,
        batch: Vec<ObservedRequest>,
        result: Result<AnalysisResult, BridgeError>,
    },
    AlertFinished {
        threat_id: String,
        severity: Severity,
        recorded_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
        channels: String,
        result: Result<AlertDispatchResponse, DispatchError>,
    },
}

struct InFlightAnalysis {
    reply: Option<oneshot::Sender<Result<AnalysisResult, CommandError>>>,
}

pub struct Engine {
    aggregator: Aggregator,
    settings: SettingsStore,
    cooldown: CooldownState,
    pending: PendingAlerts,
    scan: ScanConfig,
    is_monitoring: bool,

    timers: TimerSet,
    history: ThreatHistory,
    services: Services,
    events: EventBus,
    /// In-flight threat inserts, keyed by threat id
    saves: HashMap<String, JoinHandle<()>>,

    analysis: Option<InFlightAnalysis>,
    analysis_history: VecDeque<AnalysisResult>,
    last_analysis_at: Option<DateTime<Utc>>,

    inbound_rx: mpsc::Receiver<ResourceTiming>,
    inbound_open: bool,
    command_rx: mpsc::Receiver<Command>,
    tick_rx: mpsc::Receiver<Tick>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,
}

impl Engine {
    /// Build an engine plus its command handle and inbound entry sender.
    /// Fails only if the stored threat history cannot be read.
    pub async fn new(
        config: &MonitorConfig,
        services: Services,
        events: EventBus,
    ) -> Result<(Self, MonitorHandle, mpsc::Sender<ResourceTiming>), StoreError> {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (tick_tx, tick_rx) = mpsc::channel(TICK_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CAPACITY);

        let history = ThreatHistory::load(services.store.clone()).await?;
        let normalizer = Normalizer::new(TrustPolicy::new(&config.page_host), Utc::now());

        let engine = Self {
            aggregator: Aggregator::new(normalizer),
            settings: SettingsStore::open(&config.data_dir),
            cooldown: CooldownState::new(),
            pending: PendingAlerts::new(),
            scan: config.scan,
            is_monitoring: true,
            timers: TimerSet::new(tick_tx),
            history,
            services,
            events,
            saves: HashMap::new(),
            analysis: None,
            analysis_history: VecDeque::with_capacity(ANALYSIS_HISTORY_LIMIT),
            last_analysis_at: None,
            inbound_rx,
            inbound_open: true,
            command_rx,
            tick_rx,
            internal_tx,
            internal_rx,
        };

        Ok((engine, MonitorHandle::new(command_tx), inbound_tx))
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        log::info!(
            "[TrafficMonitor] Engine started (page host: {}, auto-analysis: {}, every {}s)",
            self.aggregator.page_host(),
            self.scan.auto_enabled,
            self.scan.interval_secs
        );

        self.timers.reschedule(TimerKind::StatsRefresh, STATS_REFRESH_INTERVAL);
        self.schedule_auto_analysis();

        loop {
            tokio::select! {
                // Entries queued before a command are applied before it
                biased;

                entry = self.inbound_rx.recv(), if self.inbound_open => match entry {
                    Some(entry) => self.drain_inbound(entry),
                    None => {
                        log::info!("[TrafficMonitor] Observation feed closed");
                        self.inbound_open = false;
                    }
                },

                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),

                Some(tick) = self.tick_rx.recv() => self.handle_tick(tick),

                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
            }
        }

        self.timers.cancel_all();
        log::info!("[TrafficMonitor] Engine stopped");
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Process `first` and everything already queued behind it, in order
    fn drain_inbound(&mut self, first: ResourceTiming) {
        let mut batch = vec![first];
        while let Ok(entry) = self.inbound_rx.try_recv() {
            batch.push(entry);
        }

        if !self.is_monitoring {
            log::trace!("[TrafficMonitor] Paused, discarding {} entries", batch.len());
            return;
        }

        let mut observed = 0;
        for entry in &batch {
            if self.observe(entry) {
                observed += 1;
            }
        }
        if observed > 0 {
            self.events.emit(MonitorEvent::StatsUpdated(self.aggregator.stats()));
        }
    }

    fn observe(&mut self, entry: &ResourceTiming) -> bool {
        let Some(request) = self.aggregator.normalize(entry) else {
            return false;
        };
        let threat = synthesize(&request, self.aggregator.page_host());

        self.events.emit(MonitorEvent::RequestObserved(request.clone()));
        self.aggregator.push_request(request);

        if let Some(threat) = threat {
            self.handle_threat(threat);
        }
        true
    }

    /// Buffer, persist, then run the alert path
    fn handle_threat(&mut self, threat: Threat) {
        log::info!(
            "[TrafficMonitor] {} threat: {} from {}",
            threat.severity,
            threat.threat_type,
            threat.source
        );

        self.aggregator.push_threat(threat.clone());
        self.events.emit(MonitorEvent::ThreatDetected(threat.clone()));
        self.persist(&threat);
        self.maybe_alert(&threat);
    }

    fn persist(&mut self, threat: &Threat) {
        let store = self.services.store.clone();
        let identity = self.services.identity.clone();
        let events = self.events.clone();
        let threat = threat.clone();

        let id = threat.id.clone();
        let save = tokio::spawn(async move {
            let agent_id = agent_id_for(identity.as_ref()).await;
            if let Err(e) = store.insert(NewThreatRecord::from_threat(&threat, &agent_id)).await {
                log::error!("[ThreatPersistence] Failed to save threat {}: {}", threat.id, e);
                events.notice(NoticeLevel::Error, "Failed to save threat", e.to_string());
            }
        });

        self.saves.retain(|_, handle| !handle.is_finished());
        self.saves.insert(id, save);
    }

    // ========================================================================
    // ALERTS
    // ========================================================================

    fn maybe_alert(&mut self, threat: &Threat) {
        let now = Utc::now();
        let settings = self.settings.get();

        match alerts::evaluate(threat, settings, &self.cooldown, now) {
            AlertDecision::Send => {}
            AlertDecision::CoolingDown { remaining_secs } => {
                log::info!(
                    "[AlertChannels] Cooldown active for {} alerts, {}s remaining",
                    threat.severity,
                    remaining_secs
                );
                return;
            }
            AlertDecision::SeverityFiltered | AlertDecision::NoChannelEnabled => return,
        }

        let request = ThreatAlertRequest::from_threat(threat, settings);
        if request.channels.is_empty() {
            log::warn!("[AlertChannels] Channel enabled but no recipient configured");
            return;
        }
        if !self.pending.try_insert(&threat.id, now) {
            return;
        }

        let previous = self.cooldown.record(threat.severity, now);
        let dispatcher = self.services.dispatcher.clone();
        let tx = self.internal_tx.clone();
        let threat_id = threat.id.clone();
        let severity = threat.severity;
        let channels = request.channels.describe();

        log::info!("[AlertChannels] Dispatching {} alert via {}", severity, channels);

        tokio::spawn(async move {
            let result = dispatcher.dispatch(&request).await;
            let _ = tx
                .send(Internal::AlertFinished {
                    threat_id,
                    severity,
                    recorded_at: now,
                    previous,
                    channels,
                    result,
                })
                .await;
        });
    }

    fn finish_alert(
        &mut self,
        threat_id: String,
        severity: Severity,
        recorded_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
        channels: String,
        result: Result<AlertDispatchResponse, DispatchError>,
    ) {
        let failure = match result {
            Ok(response) if response.reached_any() => {
                if response.is_partial() {
                    self.events.notice(
                        NoticeLevel::Warning,
                        "Some alerts failed",
                        response.results.errors.join("; "),
                    );
                }
                self.events.emit(MonitorEvent::AlertSent {
                    threat_id: Some(threat_id),
                    channels: channels.clone(),
                });
                self.events.notice(
                    NoticeLevel::Info,
                    "Alert sent",
                    format!("{} threat alert sent via {}", severity, channels),
                );
                return;
            }
            Ok(response) => response.results.errors.join("; "),
            Err(e) => e.to_string(),
        };

        // Nothing was delivered; let the next threat of this severity try again
        if self.cooldown.last_sent(severity) == Some(recorded_at) {
            self.cooldown.restore(severity, previous);
        }
        self.events.notice(NoticeLevel::Error, "Alert failed", failure);
    }

    fn send_test_alert(&self, reply: oneshot::Sender<Result<AlertDispatchResponse, CommandError>>) {
        let settings = self.settings.get();
        let request = ThreatAlertRequest::test_alert(settings, Utc::now());
        if !settings.any_channel_enabled() || request.channels.is_empty() {
            let _ = reply.send(Err(CommandError::NoChannelEnabled));
            return;
        }

        let dispatcher = self.services.dispatcher.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = dispatcher.dispatch(&request).await;
            match &result {
                Ok(response) if response.reached_any() => {
                    events.emit(MonitorEvent::AlertSent {
                        threat_id: None,
                        channels: request.channels.describe(),
                    });
                    events.notice(NoticeLevel::Info, "Test alert sent", "Check your inbox and phone");
                }
                Ok(response) => {
                    events.notice(NoticeLevel::Error, "Test alert failed", response.results.errors.join("; "))
                }
                Err(e) => events.notice(NoticeLevel::Error, "Test alert failed", e.to_string()),
            }
            let _ = reply.send(result.map_err(CommandError::from));
        });
    }

    // ========================================================================
    // REMOTE CLASSIFICATION
    // ========================================================================

    fn schedule_auto_analysis(&mut self) {
        if self.is_monitoring && self.scan.auto_enabled {
            self.timers.reschedule(TimerKind::AutoAnalysis, self.scan.interval());
        } else {
            self.timers.cancel(TimerKind::AutoAnalysis);
        }
    }

    fn start_analysis(&mut self, reply: Option<oneshot::Sender<Result<AnalysisResult, CommandError>>>) {
        if self.analysis.is_some() {
            if let Some(reply) = reply {
                let _ = reply.send(Err(CommandError::AnalysisInProgress));
            }
            return;
        }

        let batch = self.aggregator.recent_requests(MAX_BATCH);
        if batch.is_empty() {
            if let Some(reply) = reply {
                let _ = reply.send(Err(CommandError::NoRequests));
            }
            return;
        }

        let classifier = self.services.classifier.clone();
        let tx = self.internal_tx.clone();
        let generation = self.aggregator.generation();

        tokio::spawn(async move {
            let result = analyze_batch(classifier.as_ref(), &batch).await;
            let _ = tx
                .send(Internal::AnalysisFinished {
                    generation,
                    batch,
                    result,
                })
                .await;
        });

        self.analysis = Some(InFlightAnalysis { reply });
    }

    fn finish_analysis(
        &mut self,
        generation: u64,
        batch: Vec<ObservedRequest>,
        result: Result<AnalysisResult, BridgeError>,
    ) {
        let reply = self.analysis.take().and_then(|a| a.reply);
        let respond = |outcome: Result<AnalysisResult, CommandError>| {
            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
        };

        if generation != self.aggregator.generation() {
            log::info!("[AIBridge] Discarding verdict computed before history was cleared");
            respond(Err(CommandError::Discarded));
            return;
        }

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                let title = if e.is_recoverable() {
                    "AI analysis unavailable"
                } else {
                    "AI analysis failed"
                };
                self.events.notice(NoticeLevel::Error, title, e.to_string());
                respond(Err(e.into()));
                return;
            }
        };

        let now = Utc::now();
        self.last_analysis_at = Some(now);
        self.analysis_history.push_front(result.clone());
        self.analysis_history.truncate(ANALYSIS_HISTORY_LIMIT);
        self.events.emit(MonitorEvent::AnalysisCompleted(result.clone()));

        let threat = analysis_to_threat(&result.analysis, &batch, self.aggregator.page_host(), now);
        match threat {
            Some(threat) => {
                self.events.notice(
                    NoticeLevel::Warning,
                    "AI detected a threat",
                    result.analysis.description.clone(),
                );
                self.handle_threat(threat);
                self.events.emit(MonitorEvent::StatsUpdated(self.aggregator.stats()));
            }
            None => self.events.notice(
                NoticeLevel::Info,
                "Analysis complete",
                format!("No threats detected in {} requests", result.packets_analyzed),
            ),
        }

        respond(Ok(result));
    }

    // ========================================================================
    // DISPATCH
    // ========================================================================

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::AnalysisFinished {
                generation,
                batch,
                result,
            } => self.finish_analysis(generation, batch, result),
            Internal::AlertFinished {
                threat_id,
                severity,
                recorded_at,
                previous,
                channels,
                result,
            } => self.finish_alert(threat_id, severity, recorded_at, previous, channels, result),
        }
    }

    fn handle_tick(&mut self, tick: Tick) {
        if !self.timers.accept(tick) {
            return;
        }

        match tick.kind {
            TimerKind::StatsRefresh => {
                self.history.sync();
                self.events.emit(MonitorEvent::StatsUpdated(self.aggregator.stats()));
            }
            TimerKind::AutoAnalysis => {
                if !self.is_monitoring || !self.scan.auto_enabled {
                    return;
                }
                if self.analysis.is_some() {
                    log::debug!("[AIBridge] Analysis still running, skipping this tick");
                    return;
                }
                if self.aggregator.request_count() < self.scan.min_requests {
                    log::debug!(
                        "[AIBridge] {} of {} requests buffered, waiting",
                        self.aggregator.request_count(),
                        self.scan.min_requests
                    );
                    return;
                }
                self.start_analysis(None);
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::ToggleMonitoring(reply) => {
                self.is_monitoring = !self.is_monitoring;
                self.schedule_auto_analysis();
                let (title, message) = if self.is_monitoring {
                    ("Monitoring resumed", "Capturing network traffic")
                } else {
                    ("Monitoring paused", "New traffic is ignored until resumed")
                };
                self.events.notice(NoticeLevel::Info, title, message);
                let _ = reply.send(self.is_monitoring);
            }

            Command::BlockThreat(id, reply) => {
                let blocked = self.aggregator.block_threat(&id);
                if blocked {
                    self.events.emit(MonitorEvent::StatsUpdated(self.aggregator.stats()));
                    self.mark_stored_blocked(id);
                }
                let _ = reply.send(blocked);
            }

            Command::ClearHistory(reply) => {
                self.aggregator.clear();
                self.analysis_history.clear();
                self.last_analysis_at = None;
                self.events.emit(MonitorEvent::StatsUpdated(self.aggregator.stats()));
                self.events.notice(NoticeLevel::Info, "History cleared", "All captured traffic was removed");
                let _ = reply.send(());
            }

            Command::AnalyzeNow(reply) => self.start_analysis(Some(reply)),

            Command::UpdateAlertSettings(patch, reply) => {
                let _ = reply.send(self.update_alert_settings(patch));
            }

            Command::SendTestAlert(reply) => self.send_test_alert(reply),

            Command::SetScanConfig(config, reply) => {
                self.scan = config;
                self.schedule_auto_analysis();
                log::info!(
                    "[AIBridge] Auto-analysis {} (every {}s, min {} requests)",
                    if config.auto_enabled { "enabled" } else { "disabled" },
                    config.interval_secs,
                    config.min_requests
                );
                let _ = reply.send(config);
            }

            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }

            Command::ThreatHistory(reply) => {
                self.history.sync();
                let _ = reply.send(HistorySnapshot {
                    threats: self.history.threats().to_vec(),
                    stats: self.history.stats(),
                });
            }

            Command::UpdateThreatStatus(id, status, reply) => {
                let _ = reply.send(self.update_threat_status(&id, status).await);
            }

            Command::Shutdown => {}
        }
    }

    fn update_alert_settings(
        &mut self,
        patch: AlertSettingsPatch,
    ) -> Result<AlertChannelSettings, CommandError> {
        match self.settings.update(patch) {
            Ok(settings) => {
                log::info!("[AlertChannels] Settings saved");
                Ok(settings.clone())
            }
            Err(e) => {
                self.events.notice(NoticeLevel::Error, "Failed to save alert settings", e.to_string());
                Err(e.into())
            }
        }
    }

    async fn update_threat_status(&mut self, id: &str, status: ThreatStatus) -> Result<bool, CommandError> {
        match RouteGuard::new(self.services.identity.as_ref()).check(&TRIAGE_ROLES).await {
            Access::Allowed => {}
            Access::SignInRequired => return Err(CommandError::SignInRequired),
            denied @ Access::Forbidden { .. } => {
                return Err(CommandError::Forbidden(
                    denied.describe_required().unwrap_or_default(),
                ))
            }
        }

        self.history.sync();
        match self.history.update_status(id, status).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                self.events.notice(NoticeLevel::Error, "Failed to update threat", e.to_string());
                Err(e.into())
            }
        }
    }

    /// Mirror an operator block into the store; the in-memory block stands either way.
    /// Waits for the threat's own insert so the update never lands first.
    fn mark_stored_blocked(&mut self, id: String) {
        let store = self.services.store.clone();
        let events = self.events.clone();
        let save = self.saves.remove(&id);

        tokio::spawn(async move {
            if let Some(save) = save {
                if let Err(e) = save.await {
                    log::warn!("[ThreatPersistence] Save task for {} did not finish: {}", id, e);
                }
            }

            let patch = ThreatPatch::status_change(ThreatStatus::Blocked, Utc::now());
            match store.update(&id, patch).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    log::warn!("[ThreatPersistence] Threat {} not in store; block kept in memory only", id);
                    events.notice(
                        NoticeLevel::Error,
                        "Failed to update threat",
                        format!("Threat {} was not found in the store", id),
                    );
                }
                Err(e) => {
                    log::error!("[ThreatPersistence] Failed to mark {} blocked: {}", id, e);
                    events.notice(NoticeLevel::Error, "Failed to update threat", e.to_string());
                }
            }
        });
    }

    fn snapshot(&self) -> MonitorSnapshot {
        let seconds_until_next_scan = if self.is_monitoring && self.scan.auto_enabled {
            self.timers.seconds_until(TimerKind::AutoAnalysis)
        } else {
            None
        };

        MonitorSnapshot {
            requests: self.aggregator.requests().cloned().collect(),
            threats: self.aggregator.threats().cloned().collect(),
            stats: self.aggregator.stats(),
            is_monitoring: self.is_monitoring,
            is_analyzing: self.analysis.is_some(),
            last_analysis: self.analysis_history.front().cloned(),
            last_analysis_at: self.last_analysis_at,
            analysis_history: self.analysis_history.iter().cloned().collect(),
            seconds_until_next_scan,
            scan: self.scan,
            alert_settings: self.settings.get().clone(),
        }
    }
}
