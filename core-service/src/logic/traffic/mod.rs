//! Traffic Module
//!
//! Scores browser-observed network transfers.
//!
//! ## Structure
//! - `types`: ResourceTiming, ObservedRequest, RiskReason, ...
//! - `rules`: Point values, patterns, trust allow-list
//! - `classifier`: Additive risk scoring
//! - `normalizer`: Dedup + canonical request records
//!
//! ## Usage
//! ```ignore
//! use crate::logic::traffic::{Normalizer, TrustPolicy, ResourceTiming};
//!
//! let mut normalizer = Normalizer::new(TrustPolicy::new("app.example.org"), Utc::now());
//! if let Some(request) = normalizer.normalize(&entry) {
//!     println!("{} scored {}", request.url, request.risk_score);
//! }
//! ```

pub mod types;
pub mod rules;
pub mod classifier;
pub mod normalizer;

pub use types::{
    ResourceTiming,
    ObservedRequest,
    Protocol,
    RequestStatus,
    RiskReason,
    domain_of,
};

pub use rules::{TrustPolicy, THREAT_MIN_SCORE};

pub use classifier::{classify, classify_parts, RiskAssessment};
pub use normalizer::Normalizer;
