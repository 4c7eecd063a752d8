//! Data models

pub mod metrics;
pub mod process;
pub mod threat;

pub use metrics::*;
pub use process::*;
pub use threat::*;
