//! Threat Module
//!
//! Turns scored requests into security events.
//!
//! ## Structure
//! - `types`: ThreatType, Severity, ThreatStatus, Threat
//! - `synthesizer`: Reason-precedence mapping from request to threat
//!
//! ## Usage
//! ```ignore
//! use crate::logic::threat::synthesize;
//!
//! if let Some(threat) = synthesize(&request, "app.example.org") {
//!     println!("{} ({})", threat.threat_type, threat.severity);
//! }
//! ```

pub mod types;
pub mod synthesizer;

pub use types::{Severity, Threat, ThreatStatus, ThreatType};
pub use synthesizer::synthesize;
