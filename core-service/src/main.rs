//! Sentinel Core - Main Entry Point
//!
//! Reads resource-timing entries as JSON lines on stdin, writes engine
//! events as JSON lines on stdout, logs to stderr.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::watch;

use sentinel_core::constants::{self, APP_NAME, APP_VERSION};
use sentinel_core::logic::agent::{local_hostname, AgentReporter, HostCollector};
use sentinel_core::logic::ai_bridge::HttpClassificationClient;
use sentinel_core::logic::alerts::HttpAlertDispatcher;
use sentinel_core::logic::config::MonitorConfig;
use sentinel_core::logic::identity::StaticIdentity;
use sentinel_core::logic::persistence::SqliteThreatStore;
use sentinel_core::logic::source::{spawn_source, JsonLinesSource};
use sentinel_core::{Engine, EventBus, Services};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}...", APP_NAME, APP_VERSION);

    let config = MonitorConfig::from_env();
    log::info!("  Page host: {}", config.page_host);
    log::info!("  Functions: {}", config.functions.base_url);
    log::info!("  Data dir: {}", config.data_dir.display());

    let store = match SqliteThreatStore::open(&config.data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::error!("[ThreatPersistence] Cannot open threat database: {}", e);
            std::process::exit(1);
        }
    };

    let services = Services {
        store,
        classifier: Arc::new(HttpClassificationClient::new(config.functions.clone())),
        dispatcher: Arc::new(HttpAlertDispatcher::new(config.functions.clone())),
        identity: Arc::new(StaticIdentity::from_env()),
    };

    let events = EventBus::new();
    let mut feed = events.subscribe();
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            match feed.recv().await {
                Ok(event) => {
                    let Ok(mut line) = serde_json::to_vec(&event) else { continue };
                    line.push(b'\n');
                    if stdout.write_all(&line).await.is_err() {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("[TrafficMonitor] Event output lagged, {} events dropped", n);
                }
                Err(_) => break,
            }
        }
    });

    let (engine, handle, inbound) = match Engine::new(&config, services, events).await {
        Ok(parts) => parts,
        Err(e) => {
            log::error!("[ThreatPersistence] Cannot load threat history: {}", e);
            std::process::exit(1);
        }
    };
    let engine_task = engine.spawn();

    let stdin = JsonLinesSource::new(BufReader::new(tokio::io::stdin()));
    spawn_source(Box::new(stdin), inbound);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let agent_task = if config.agent_enabled {
        let hostname = local_hostname();
        let agent_id = constants::get_agent_id(&hostname);
        let reporter = AgentReporter::new(
            HostCollector::new(agent_id, hostname),
            &config.functions,
            constants::get_agent_key(),
            config.agent_interval_secs,
        );
        Some(tokio::spawn(reporter.run(shutdown_rx)))
    } else {
        None
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
    log::info!("Shutting down...");

    if let Ok(snapshot) = handle.snapshot().await {
        log::info!(
            "Session totals: {} requests, {} suspicious, {} threats",
            snapshot.stats.total_requests,
            snapshot.stats.suspicious_requests,
            snapshot.stats.threats_detected
        );
    }

    let _ = shutdown_tx.send(true);
    handle.shutdown().await;
    let _ = engine_task.await;
    if let Some(task) = agent_task {
        let _ = task.await;
    }
}
