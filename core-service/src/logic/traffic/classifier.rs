//! Request Classifier
//!
//! ONLY scoring logic - no types, no state.
//! Input: one resource-timing entry + trust policy
//! Output: RiskAssessment (score 0-100, ordered reasons)

use super::rules::{
    TrustPolicy, PATTERN_REGEXES, LARGE_TRANSFER_BYTES, SLOW_REQUEST_MS, MAX_RISK_SCORE,
};
use super::types::{domain_of, ResourceTiming, RiskReason};

/// Score and the rules that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub score: u8,
    pub reasons: Vec<RiskReason>,
}

impl RiskAssessment {
    fn from_reasons(reasons: Vec<RiskReason>) -> Self {
        let total: u32 = reasons.iter().map(|r| r.points()).sum();
        Self {
            score: total.min(MAX_RISK_SCORE) as u8,
            reasons,
        }
    }
}

// ============================================================================
// MAIN CLASSIFICATION FUNCTION
// ============================================================================

/// Score one observed transfer
///
/// Deterministic: identical input always yields identical output.
pub fn classify(entry: &ResourceTiming, trust: &TrustPolicy) -> RiskAssessment {
    let domain = domain_of(&entry.name);
    classify_parts(
        &entry.name,
        &domain,
        entry.duration,
        entry.transfer_bytes(),
        &entry.initiator_type,
        trust,
    )
}

/// Score from already-extracted fields
pub fn classify_parts(
    url: &str,
    domain: &str,
    duration_ms: f64,
    transfer_bytes: u64,
    initiator_type: &str,
    trust: &TrustPolicy,
) -> RiskAssessment {
    let mut reasons = Vec::new();

    for (name, re) in PATTERN_REGEXES.iter() {
        if re.is_match(url) {
            reasons.push(RiskReason::SuspiciousPattern(name));
        }
    }

    let trusted = trust.is_trusted(domain);
    if !trusted {
        reasons.push(RiskReason::UntrustedDomain);
    }

    // Potential exfiltration
    if transfer_bytes > LARGE_TRANSFER_BYTES {
        reasons.push(RiskReason::LargeTransfer { bytes: transfer_bytes });
    }

    // Potential C&C long-poll
    if duration_ms > SLOW_REQUEST_MS {
        reasons.push(RiskReason::SlowRequest { duration_ms });
    }

    if !trusted {
        match initiator_type {
            "script" => reasons.push(RiskReason::ThirdPartyScript),
            "fetch" | "xmlhttprequest" => reasons.push(RiskReason::ExternalApiCall),
            _ => {}
        }
    }

    RiskAssessment::from_reasons(reasons)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn trust() -> TrustPolicy {
        TrustPolicy::new("dashboard.local")
    }

    #[test]
    fn test_trusted_small_fast_scores_zero() {
        let entry = ResourceTiming::new("https://fonts.googleapis.com/css2?family=Inter", 10.0, "link")
            .with_duration(40.0)
            .with_transfer_size(2_000);

        let result = classify(&entry, &trust());
        assert_eq!(result.score, 0);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_exfiltration_scenario() {
        let entry = ResourceTiming::new("https://api.unknown-host.io/upload", 100.0, "fetch")
            .with_duration(300.0)
            .with_transfer_size(150_000);

        let result = classify(&entry, &trust());
        assert_eq!(result.score, 60);
        assert_eq!(
            result.reasons,
            vec![
                RiskReason::UntrustedDomain,
                RiskReason::LargeTransfer { bytes: 150_000 },
                RiskReason::ExternalApiCall,
            ]
        );
    }

    #[test]
    fn test_pattern_points_per_match() {
        // "analytics" and "collect" both hit; the host is allow-listed
        let entry = ResourceTiming::new("https://x.supabase.co/analytics/collect", 1.0, "img");
        let result = classify(&entry, &trust());
        assert_eq!(result.score, 40);
        assert_eq!(result.reasons.len(), 2);
    }

    #[test]
    fn test_pattern_match_is_case_insensitive() {
        let entry = ResourceTiming::new("https://localhost/TRACKING.gif", 1.0, "img");
        let result = classify(&entry, &trust());
        assert_eq!(result.reasons, vec![RiskReason::SuspiciousPattern("tracking")]);
    }

    #[test]
    fn test_third_party_script() {
        let entry = ResourceTiming::new("https://cdn.evil.example/lib.js", 1.0, "script");
        let result = classify(&entry, &trust());
        assert_eq!(result.score, 30);
        assert!(result.reasons.contains(&RiskReason::ThirdPartyScript));
    }

    #[test]
    fn test_own_host_is_trusted() {
        let entry = ResourceTiming::new("https://dashboard.local/api/data", 1.0, "fetch");
        let result = classify(&entry, &trust());
        assert_eq!(result.score, 0);
    }

    #[test]
    fn test_slow_request() {
        let entry = ResourceTiming::new("https://localhost/poll", 1.0, "fetch").with_duration(5_001.0);
        let result = classify(&entry, &trust());
        assert_eq!(result.score, 10);
        assert_eq!(result.reasons[0].to_string(), "Slow request: 5.0s");
    }

    #[test]
    fn test_score_is_clamped() {
        let entry = ResourceTiming::new(
            "https://t.example/tracking/analytics/pixel/beacon/collect/telemetry",
            1.0,
            "xmlhttprequest",
        )
        .with_duration(9_000.0)
        .with_transfer_size(500_000);

        let result = classify(&entry, &trust());
        assert_eq!(result.score, 100);
        // 6 patterns + untrusted + large + slow + api
        assert_eq!(result.reasons.len(), 10);
    }

    #[test]
    fn test_unparsable_url_is_untrusted() {
        let entry = ResourceTiming::new("::not-a-url::", 1.0, "other");
        let result = classify(&entry, &trust());
        assert_eq!(result.reasons, vec![RiskReason::UntrustedDomain]);
    }

    #[test]
    fn test_adding_condition_never_decreases_score() {
        let base = ResourceTiming::new("https://cdn.other.net/a", 1.0, "img");
        let larger = base.clone().with_transfer_size(200_000);
        let slower = larger.clone().with_duration(8_000.0);

        let s0 = classify(&base, &trust()).score;
        let s1 = classify(&larger, &trust()).score;
        let s2 = classify(&slower, &trust()).score;
        assert!(s0 <= s1 && s1 <= s2);
        assert_eq!((s0, s1, s2), (15, 40, 50));
    }

    #[test]
    fn test_deterministic() {
        let entry = ResourceTiming::new("https://beacon.ads.net/b", 3.0, "beacon")
            .with_transfer_size(120_000);
        assert_eq!(classify(&entry, &trust()), classify(&entry, &trust()));
    }
}
