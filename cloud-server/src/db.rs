//! Database module - PostgreSQL connection and migrations

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Pool that connects on first use
pub fn lazy_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect_lazy(database_url)
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

/// Database schema SQL
const SCHEMA_SQL: &str = r#"
-- Host samples reported by agents
CREATE TABLE IF NOT EXISTS system_metrics (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id VARCHAR(255) NOT NULL,
    hostname VARCHAR(255) NOT NULL,
    cpu_usage REAL NOT NULL,
    memory_usage REAL NOT NULL,
    memory_total BIGINT,
    memory_used BIGINT,
    disk_usage REAL,
    network_in BIGINT NOT NULL DEFAULT 0,
    network_out BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Latest process snapshot per agent (replaced on each report)
CREATE TABLE IF NOT EXISTS system_processes (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id VARCHAR(255) NOT NULL,
    pid INT NOT NULL,
    name VARCHAR(255) NOT NULL,
    cpu_percent REAL NOT NULL,
    memory_percent REAL NOT NULL,
    status VARCHAR(50) NOT NULL,
    user_name VARCHAR(255),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Threats from agents and monitoring sessions
CREATE TABLE IF NOT EXISTS detected_threats (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    agent_id VARCHAR(255) NOT NULL,
    threat_type VARCHAR(100) NOT NULL,
    severity VARCHAR(20) NOT NULL,
    description TEXT NOT NULL,
    source_ip VARCHAR(255),
    destination_ip VARCHAR(255),
    port INT,
    protocol VARCHAR(20),
    process_name VARCHAR(255),
    process_pid INT,
    status VARCHAR(20) NOT NULL DEFAULT 'active',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    resolved_at TIMESTAMPTZ
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_metrics_agent ON system_metrics(agent_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_metrics_created ON system_metrics(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_processes_agent ON system_processes(agent_id);
CREATE INDEX IF NOT EXISTS idx_threats_created ON detected_threats(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_threats_status ON detected_threats(status);
"#;
