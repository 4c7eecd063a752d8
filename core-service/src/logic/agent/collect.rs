//! Host Metrics Collection
//!
//! Samples CPU, memory, disk, network and the busiest processes via sysinfo.

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, Networks, System};

/// Processes included per report
pub const TOP_PROCESSES: usize = 15;

// ============================================================================
// PAYLOAD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub memory_total: u64,
    pub memory_used: u64,
    pub disk_usage: f32,
    pub network_in: u64,
    pub network_out: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Threat reported by the host itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentThreat {
    pub threat_type: String,
    pub severity: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_pid: Option<u32>,
}

/// Body of `POST /system-metrics`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPayload {
    pub agent_id: String,
    pub hostname: String,
    pub metrics: HostMetrics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessSample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub threats: Vec<AgentThreat>,
}

// ============================================================================
// COLLECTOR
// ============================================================================

pub struct HostCollector {
    agent_id: String,
    hostname: String,
    sys: System,
    networks: Networks,
    disks: Disks,
}

impl HostCollector {
    pub fn new(agent_id: String, hostname: String) -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            agent_id,
            hostname,
            sys,
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Take one sample. Network counters are bytes since the previous call.
    pub fn collect(&mut self) -> AgentPayload {
        self.sys.refresh_all();
        self.networks.refresh();
        self.disks.refresh();

        let memory_total = self.sys.total_memory();
        let memory_used = self.sys.used_memory();

        let (network_in, network_out) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.received(), tx + data.transmitted())
            });

        let metrics = HostMetrics {
            cpu_usage: self.sys.global_cpu_info().cpu_usage(),
            memory_usage: percent(memory_used, memory_total),
            memory_total,
            memory_used,
            disk_usage: self.disk_usage(),
            network_in,
            network_out,
        };

        AgentPayload {
            agent_id: self.agent_id.clone(),
            hostname: self.hostname.clone(),
            metrics,
            processes: self.top_processes(memory_total),
            threats: Vec::new(),
        }
    }

    fn disk_usage(&self) -> f32 {
        let (total, available) = self
            .disks
            .iter()
            .fold((0u64, 0u64), |(t, a), d| (t + d.total_space(), a + d.available_space()));
        percent(total.saturating_sub(available), total)
    }

    fn top_processes(&self, memory_total: u64) -> Vec<ProcessSample> {
        let mut processes: Vec<ProcessSample> = self
            .sys
            .processes()
            .iter()
            .map(|(pid, proc)| ProcessSample {
                pid: pid.as_u32(),
                name: proc.name().to_string(),
                cpu_percent: proc.cpu_usage(),
                memory_percent: percent(proc.memory(), memory_total),
                status: proc.status().to_string(),
                user_name: proc.user_id().map(|uid| uid.to_string()),
            })
            .collect();

        processes.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        processes.truncate(TOP_PROCESSES);
        processes
    }
}

fn percent(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 100.0) as f32
    }
}

/// Machine hostname, or "unknown-host"
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
    }

    #[test]
    fn test_collect_shape() {
        let mut collector = HostCollector::new("agent-test".into(), local_hostname());
        let payload = collector.collect();

        assert_eq!(payload.agent_id, "agent-test");
        assert!(payload.processes.len() <= TOP_PROCESSES);
        assert!(payload.metrics.memory_usage >= 0.0 && payload.metrics.memory_usage <= 100.0);

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["metrics"]["cpu_usage"].is_number());
        assert!(json.get("threats").is_none());
    }
}
