//! Rolling Aggregator
//!
//! Bounded newest-first buffers of requests and threats, plus the
//! statistics folded over them. Owns the dedup state so that `clear()`
//! is the only way to reset it.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use super::threat::{Threat, ThreatStatus};
use super::traffic::{Normalizer, ObservedRequest, RequestStatus, ResourceTiming};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const MAX_REQUESTS: usize = 200;
pub const MAX_THREATS: usize = 100;

// ============================================================================
// STATS
// ============================================================================

/// Summary over the current buffers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficStats {
    pub total_requests: usize,
    pub suspicious_requests: usize,
    pub blocked_requests: usize,
    pub total_data_transferred: u64,
    pub requests_by_domain: BTreeMap<String, usize>,
    pub requests_by_type: BTreeMap<String, usize>,
    pub threats_detected: usize,
}

impl TrafficStats {
    /// Fresh fold; never updated incrementally
    pub fn fold<'a, R, T>(requests: R, threats: T) -> Self
    where
        R: IntoIterator<Item = &'a ObservedRequest>,
        T: IntoIterator<Item = &'a Threat>,
    {
        let mut stats = TrafficStats::default();

        for req in requests {
            stats.total_requests += 1;
            stats.total_data_transferred += req.transfer_bytes;
            *stats.requests_by_domain.entry(req.domain.clone()).or_insert(0) += 1;
            *stats.requests_by_type.entry(req.initiator_type.clone()).or_insert(0) += 1;

            match req.status {
                RequestStatus::Suspicious => stats.suspicious_requests += 1,
                RequestStatus::Blocked => stats.blocked_requests += 1,
                RequestStatus::Normal => {}
            }
        }

        stats.threats_detected = threats.into_iter().count();
        stats
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct Aggregator {
    normalizer: Normalizer,
    requests: VecDeque<ObservedRequest>,
    threats: VecDeque<Threat>,
    /// Bumped on every clear; results computed against an older
    /// generation must be dropped.
    generation: u64,
}

impl Aggregator {
    pub fn new(normalizer: Normalizer) -> Self {
        Self {
            normalizer,
            requests: VecDeque::with_capacity(MAX_REQUESTS),
            threats: VecDeque::with_capacity(MAX_THREATS),
            generation: 0,
        }
    }

    /// Normalize a raw entry against this session's dedup state
    pub fn normalize(&mut self, entry: &ResourceTiming) -> Option<ObservedRequest> {
        self.normalizer.normalize(entry)
    }

    pub fn page_host(&self) -> &str {
        &self.normalizer.trust().page_host
    }

    pub fn ingest(&mut self, request: Option<ObservedRequest>, threat: Option<Threat>) {
        if let Some(request) = request {
            self.push_request(request);
        }
        if let Some(threat) = threat {
            self.push_threat(threat);
        }
    }

    pub fn push_request(&mut self, request: ObservedRequest) {
        self.requests.push_front(request);
        self.requests.truncate(MAX_REQUESTS);
    }

    pub fn push_threat(&mut self, threat: Threat) {
        self.threats.push_front(threat);
        self.threats.truncate(MAX_THREATS);
    }

    pub fn stats(&self) -> TrafficStats {
        TrafficStats::fold(&self.requests, &self.threats)
    }

    /// Mark a threat blocked, along with the request it came from.
    /// Returns false when no threat has this id. Idempotent.
    pub fn block_threat(&mut self, id: &str) -> bool {
        let Some(threat) = self.threats.iter_mut().find(|t| t.id == id) else {
            return false;
        };
        threat.status = ThreatStatus::Blocked;

        if let Some(request_id) = threat.request_id.clone() {
            if let Some(req) = self.requests.iter_mut().find(|r| r.id == request_id) {
                req.force_block();
            }
        }
        true
    }

    /// Empty both buffers and forget every dedup key
    pub fn clear(&mut self) {
        self.requests.clear();
        self.threats.clear();
        self.normalizer.reset();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Newest first
    pub fn requests(&self) -> impl Iterator<Item = &ObservedRequest> {
        self.requests.iter()
    }

    /// Newest first
    pub fn threats(&self) -> impl Iterator<Item = &Threat> {
        self.threats.iter()
    }

    pub fn recent_requests(&self, limit: usize) -> Vec<ObservedRequest> {
        self.requests.iter().take(limit).cloned().collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn threat_count(&self) -> usize {
        self.threats.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
