//! Alerts Module
//!
//! External email/SMS notification for high-severity threats.
//!
//! ## Structure
//! - `settings`: Channel preferences + JSON persistence
//! - `gate`: Severity/channel/cooldown predicate, pending set
//! - `dispatch`: Remote `send-threat-alert` contract and client

pub mod settings;
pub mod gate;
pub mod dispatch;

pub use settings::{AlertChannelSettings, AlertSettingsPatch, SettingsError, SettingsStore};
pub use gate::{evaluate, should_alert, AlertDecision, CooldownState, PendingAlerts};
pub use dispatch::{
    AlertChannels,
    AlertDispatchResponse,
    AlertDispatcher,
    DispatchError,
    DispatchResults,
    HttpAlertDispatcher,
    ThreatAlertRequest,
};
