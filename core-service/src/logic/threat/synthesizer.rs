//! Threat Synthesizer
//!
//! Maps a scored request into a classified `Threat`.
//! Pure: no I/O, no state.

use uuid::Uuid;

use super::types::{Severity, Threat, ThreatStatus, ThreatType};
use crate::logic::traffic::{ObservedRequest, RiskReason, THREAT_MIN_SCORE};

/// Build a threat for a request scoring at or above the threat threshold
///
/// Type precedence, first match wins:
/// 1. large transfer          -> data_exfiltration (critical > 70, else high)
/// 2. third-party script      -> unknown_origin    (high > 50, else medium)
/// 3. tracking/analytics URL  -> suspicious_domain (medium)
/// 4. external API call       -> data_exfiltration (high > 60, else medium)
/// 5. anything else           -> unknown_origin    (low)
pub fn synthesize(request: &ObservedRequest, page_host: &str) -> Option<Threat> {
    if request.risk_score < THREAT_MIN_SCORE {
        return None;
    }

    let (threat_type, severity) = classify_reasons(&request.risk_reasons, request.risk_score);

    Some(Threat {
        id: Uuid::new_v4().to_string(),
        threat_type,
        severity,
        source: request.domain.clone(),
        target: page_host.to_string(),
        timestamp: request.timestamp,
        status: ThreatStatus::Active,
        description: request.reason_strings().join("; "),
        request_id: Some(request.id.clone()),
    })
}

fn classify_reasons(reasons: &[RiskReason], score: u8) -> (ThreatType, Severity) {
    let has = |pred: fn(&RiskReason) -> bool| reasons.iter().any(pred);

    if has(|r| matches!(r, RiskReason::LargeTransfer { .. })) {
        let severity = if score > 70 { Severity::Critical } else { Severity::High };
        (ThreatType::DataExfiltration, severity)
    } else if has(|r| matches!(r, RiskReason::ThirdPartyScript)) {
        let severity = if score > 50 { Severity::High } else { Severity::Medium };
        (ThreatType::UnknownOrigin, severity)
    } else if has(|r| matches!(r, RiskReason::SuspiciousPattern("tracking" | "analytics"))) {
        (ThreatType::SuspiciousDomain, Severity::Medium)
    } else if has(|r| matches!(r, RiskReason::ExternalApiCall)) {
        let severity = if score > 60 { Severity::High } else { Severity::Medium };
        (ThreatType::DataExfiltration, severity)
    } else {
        (ThreatType::UnknownOrigin, Severity::Low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::traffic::{Normalizer, ResourceTiming, TrustPolicy};
    use chrono::Utc;

    const HOST: &str = "dashboard.local";

    fn observe(entry: ResourceTiming) -> ObservedRequest {
        Normalizer::new(TrustPolicy::new(HOST), Utc::now())
            .normalize(&entry)
            .unwrap()
    }

    #[test]
    fn test_below_threshold_is_none() {
        // untrusted + slow = 25
        let req = observe(
            ResourceTiming::new("https://cdn.other.net/a.png", 1.0, "img").with_duration(6_000.0),
        );
        assert_eq!(req.risk_score, 25);
        assert!(synthesize(&req, HOST).is_none());
    }

    #[test]
    fn test_exfiltration_scenario() {
        let req = observe(
            ResourceTiming::new("https://api.unknown-host.io/upload", 1.0, "fetch")
                .with_transfer_size(150_000),
        );
        assert_eq!(req.risk_score, 60);

        let threat = synthesize(&req, HOST).unwrap();
        // Large transfer outranks the API-call rule
        assert_eq!(threat.threat_type, ThreatType::DataExfiltration);
        assert_eq!(threat.severity, Severity::High);
        assert_eq!(threat.source, "api.unknown-host.io");
        assert_eq!(threat.target, HOST);
        assert_eq!(threat.status, ThreatStatus::Active);
        assert_eq!(threat.request_id.as_deref(), Some(req.id.as_str()));
        assert_eq!(
            threat.description,
            "External domain not in trusted list; Large data transfer: 146.5KB; API call to external domain"
        );
    }

    #[test]
    fn test_api_call_severity_boundary() {
        // untrusted + api = 35 -> medium
        let req = observe(ResourceTiming::new("https://api.other.io/v1", 1.0, "fetch"));
        let threat = synthesize(&req, HOST).unwrap();
        assert_eq!(threat.threat_type, ThreatType::DataExfiltration);
        assert_eq!(threat.severity, Severity::Medium);

        // untrusted + api + slow + telemetry = 65 -> high
        let req = observe(
            ResourceTiming::new("https://api.other.io/telemetry", 2.0, "fetch").with_duration(7_000.0),
        );
        assert_eq!(req.risk_score, 65);
        let threat = synthesize(&req, HOST).unwrap();
        assert_eq!(threat.threat_type, ThreatType::DataExfiltration);
        assert_eq!(threat.severity, Severity::High);
    }

    #[test]
    fn test_large_transfer_critical() {
        let req = observe(
            ResourceTiming::new("https://files.other.io/tracking", 1.0, "script")
                .with_transfer_size(300_000),
        );
        // tracking + untrusted + large + script = 75
        assert_eq!(req.risk_score, 75);
        let threat = synthesize(&req, HOST).unwrap();
        assert_eq!(threat.threat_type, ThreatType::DataExfiltration);
        assert_eq!(threat.severity, Severity::Critical);
    }

    #[test]
    fn test_third_party_script_precedence() {
        let req = observe(ResourceTiming::new("https://cdn.other.io/analytics.js", 1.0, "script"));
        // analytics + untrusted + script = 50 -> not > 50 -> medium
        assert_eq!(req.risk_score, 50);
        let threat = synthesize(&req, HOST).unwrap();
        assert_eq!(threat.threat_type, ThreatType::UnknownOrigin);
        assert_eq!(threat.severity, Severity::Medium);
    }

    #[test]
    fn test_tracking_on_trusted_host() {
        let req = observe(ResourceTiming::new("https://localhost/tracking/analytics", 1.0, "img"));
        assert_eq!(req.risk_score, 40);
        let threat = synthesize(&req, HOST).unwrap();
        assert_eq!(threat.threat_type, ThreatType::SuspiciousDomain);
        assert_eq!(threat.severity, Severity::Medium);
    }

    #[test]
    fn test_pixel_only_falls_through_to_low() {
        // pixel + beacon on a trusted host: not a tracking/analytics reason
        let req = observe(ResourceTiming::new("https://localhost/pixel/beacon", 1.0, "img"));
        assert_eq!(req.risk_score, 40);
        let threat = synthesize(&req, HOST).unwrap();
        assert_eq!(threat.threat_type, ThreatType::UnknownOrigin);
        assert_eq!(threat.severity, Severity::Low);
    }

    #[test]
    fn test_threshold_exactly_thirty() {
        let req = observe(ResourceTiming::new("https://cdn.other.io/lib.js", 1.0, "script"));
        assert_eq!(req.risk_score, 30);
        assert!(synthesize(&req, HOST).is_some());
    }
}
