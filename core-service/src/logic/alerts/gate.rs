//! Alert Gate
//!
//! Pure predicate deciding whether a threat warrants an external alert.
//! Cooldown bookkeeping is owned by the caller.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::settings::AlertChannelSettings;
use crate::logic::threat::{Severity, Threat};

/// How long a dispatched threat id stays in the pending set
pub const PENDING_ALERT_SECS: i64 = 60;

// ============================================================================
// DECISION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    Send,
    /// Severity below threshold or not opted in
    SeverityFiltered,
    NoChannelEnabled,
    CoolingDown { remaining_secs: i64 },
}

impl AlertDecision {
    pub fn is_send(&self) -> bool {
        matches!(self, AlertDecision::Send)
    }
}

/// Evaluate the gate rules in order, stopping at the first failure
pub fn evaluate(
    threat: &Threat,
    settings: &AlertChannelSettings,
    cooldown: &CooldownState,
    now: DateTime<Utc>,
) -> AlertDecision {
    let opted_in = match threat.severity {
        Severity::Critical => settings.alert_on_critical,
        Severity::High => settings.alert_on_high,
        Severity::Medium | Severity::Low => false,
    };
    if !opted_in {
        return AlertDecision::SeverityFiltered;
    }

    if !settings.any_channel_enabled() {
        return AlertDecision::NoChannelEnabled;
    }

    let window = Duration::minutes(settings.cooldown_minutes as i64);
    if let Some(last) = cooldown.last_sent(threat.severity) {
        let elapsed = now - last;
        if elapsed < window {
            return AlertDecision::CoolingDown {
                remaining_secs: (window - elapsed).num_seconds(),
            };
        }
    }

    AlertDecision::Send
}

pub fn should_alert(
    threat: &Threat,
    settings: &AlertChannelSettings,
    cooldown: &CooldownState,
    now: DateTime<Utc>,
) -> bool {
    evaluate(threat, settings, cooldown, now).is_send()
}

// ============================================================================
// COOLDOWN STATE
// ============================================================================

/// Last-sent time per severity. In-memory only.
#[derive(Debug, Default, Clone)]
pub struct CooldownState {
    last_sent: HashMap<Severity, DateTime<Utc>>,
}

impl CooldownState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sent(&self, severity: Severity) -> Option<DateTime<Utc>> {
        self.last_sent.get(&severity).copied()
    }

    /// Record a send; returns the previous timestamp for `restore`
    pub fn record(&mut self, severity: Severity, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.last_sent.insert(severity, at)
    }

    /// Undo a `record` after a dispatch that reached no channel
    pub fn restore(&mut self, severity: Severity, previous: Option<DateTime<Utc>>) {
        match previous {
            Some(at) => {
                self.last_sent.insert(severity, at);
            }
            None => {
                self.last_sent.remove(&severity);
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_sent.clear();
    }
}

// ============================================================================
// PENDING SET
// ============================================================================

/// Threat ids recently handed to dispatch
#[derive(Debug, Default)]
pub struct PendingAlerts {
    entries: HashMap<String, DateTime<Utc>>,
}

impl PendingAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless already pending; false means skip this threat
    pub fn try_insert(&mut self, threat_id: &str, now: DateTime<Utc>) -> bool {
        self.expire(now);
        if self.entries.contains_key(threat_id) {
            return false;
        }
        self.entries.insert(threat_id.to_string(), now);
        true
    }

    pub fn contains(&self, threat_id: &str) -> bool {
        self.entries.contains_key(threat_id)
    }

    pub fn expire(&mut self, now: DateTime<Utc>) {
        let ttl = Duration::seconds(PENDING_ALERT_SECS);
        self.entries.retain(|_, added| now - *added < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
