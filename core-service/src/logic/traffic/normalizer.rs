//! Request Deduplicator & Normalizer
//!
//! Turns raw timing entries into canonical `ObservedRequest`s.
//! Each (url, start offset) pair is processed at most once per session.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::classifier::classify_parts;
use super::rules::TrustPolicy;
use super::types::{domain_of, ObservedRequest, Protocol, RequestStatus, ResourceTiming};

/// Owns the dedup-key set for one monitoring session
pub struct Normalizer {
    trust: TrustPolicy,
    time_origin: DateTime<Utc>,
    seen: HashSet<String>,
}

impl Normalizer {
    pub fn new(trust: TrustPolicy, time_origin: DateTime<Utc>) -> Self {
        Self {
            trust,
            time_origin,
            seen: HashSet::new(),
        }
    }

    pub fn trust(&self) -> &TrustPolicy {
        &self.trust
    }

    /// Normalize and score an entry; `None` if it was already processed
    pub fn normalize(&mut self, entry: &ResourceTiming) -> Option<ObservedRequest> {
        let key = dedup_key(entry);
        if !self.seen.insert(key) {
            return None;
        }

        let domain = domain_of(&entry.name);
        let transfer_bytes = entry.transfer_bytes();
        let assessment = classify_parts(
            &entry.name,
            &domain,
            entry.duration,
            transfer_bytes,
            &entry.initiator_type,
            &self.trust,
        );

        Some(ObservedRequest {
            id: Uuid::new_v4().to_string(),
            timestamp: self.timestamp_of(entry),
            url: entry.name.clone(),
            domain,
            protocol: Protocol::from_url(&entry.name),
            method: "GET".to_string(),
            initiator_type: entry.initiator_type.clone(),
            duration_ms: entry.duration,
            transfer_bytes,
            status: RequestStatus::from_score(assessment.score),
            risk_score: assessment.score,
            risk_reasons: assessment.reasons,
        })
    }

    /// Whether an entry would be suppressed as a duplicate
    pub fn has_seen(&self, entry: &ResourceTiming) -> bool {
        self.seen.contains(&dedup_key(entry))
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Forget every dedup key. Only history-clear calls this.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    /// Out-of-range start offsets fall back to the session origin
    fn timestamp_of(&self, entry: &ResourceTiming) -> DateTime<Utc> {
        let offset_us = entry.start_time * 1000.0;
        let shifted = if offset_us.is_finite() && offset_us.abs() < i64::MAX as f64 {
            self.time_origin
                .checked_add_signed(Duration::microseconds(offset_us as i64))
        } else {
            None
        };
        shifted.unwrap_or_else(|| {
            log::warn!(
                "[TrafficMonitor] Start offset {} out of range for {}",
                entry.start_time,
                entry.name
            );
            self.time_origin
        })
    }
}

fn dedup_key(entry: &ResourceTiming) -> String {
    format!("{}-{}", entry.name, entry.start_time)
}
