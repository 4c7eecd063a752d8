//! Host Metrics Agent
//!
//! Optional companion that reports this machine's load and busiest
//! processes to the ingestion function.

pub mod collect;
pub mod reporter;

pub use collect::{local_hostname, AgentPayload, AgentThreat, HostCollector, HostMetrics, ProcessSample};
pub use reporter::{AgentError, AgentReporter, IngestAck};
