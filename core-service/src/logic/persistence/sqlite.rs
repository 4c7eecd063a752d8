//! SQLite Threat Store
//!
//! `detected_threats` table on a local rusqlite connection.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    ChangeEvent, NewThreatRecord, Order, StoreError, StoredThreat, ThreatFilter, ThreatPatch,
    ThreatStore,
};
use crate::logic::threat::{Severity, ThreatStatus};

pub const DATABASE_FILE: &str = "threats.db";

const CHANGE_CAPACITY: usize = 128;

const COLUMNS: &str = "id, agent_id, threat_type, severity, description, source_ip, \
    destination_ip, port, protocol, process_name, process_pid, status, created_at, resolved_at";

pub struct SqliteThreatStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteThreatStore {
    /// Open or create `<dir>/threats.db`
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join(DATABASE_FILE))?;
        Self::with_connection(conn)
    }

    /// In-memory database (tests)
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<StoredThreat>, StoreError> {
        let sql = format!("SELECT {} FROM detected_threats WHERE id = ?1", COLUMNS);
        Ok(conn.query_row(&sql, [id], map_row).optional()?)
    }

    fn publish(&self, event: ChangeEvent) {
        let _ = self.changes.send(event);
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS detected_threats (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            threat_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            description TEXT NOT NULL,
            source_ip TEXT,
            destination_ip TEXT,
            port INTEGER,
            protocol TEXT,
            process_name TEXT,
            process_pid INTEGER,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            resolved_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_threats_created ON detected_threats(created_at);
        CREATE INDEX IF NOT EXISTS idx_threats_agent ON detected_threats(agent_id);
        "#,
    )?;
    Ok(())
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{}': {}", raw, e)))
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<StoredThreat> {
    let severity: String = row.get(3)?;
    let status: String = row.get(11)?;
    let created_at: String = row.get(12)?;
    let resolved_at: Option<String> = row.get(13)?;

    Ok(StoredThreat {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        threat_type: row.get(2)?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| conversion_error(3, format!("unknown severity '{}'", severity)))?,
        description: row.get(4)?,
        source_ip: row.get(5)?,
        destination_ip: row.get(6)?,
        port: row.get(7)?,
        protocol: row.get(8)?,
        process_name: row.get(9)?,
        process_pid: row.get(10)?,
        status: ThreatStatus::parse(&status)
            .ok_or_else(|| conversion_error(11, format!("unknown status '{}'", status)))?,
        created_at: parse_time(12, &created_at)?,
        resolved_at: resolved_at.as_deref().map(|r| parse_time(13, r)).transpose()?,
    })
}

#[async_trait]
impl ThreatStore for SqliteThreatStore {
    async fn insert(&self, record: NewThreatRecord) -> Result<StoredThreat, StoreError> {
        let stored = StoredThreat {
            id: record.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            agent_id: record.agent_id,
            threat_type: record.threat_type,
            severity: record.severity,
            description: record.description,
            source_ip: record.source_ip,
            destination_ip: record.destination_ip,
            port: record.port,
            protocol: record.protocol,
            process_name: record.process_name,
            process_pid: record.process_pid,
            status: record.status,
            created_at: Utc::now(),
            resolved_at: None,
        };

        {
            let conn = self.conn.lock();
            conn.execute(
                &format!(
                    "INSERT INTO detected_threats ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    COLUMNS
                ),
                params![
                    stored.id,
                    stored.agent_id,
                    stored.threat_type,
                    stored.severity.as_str(),
                    stored.description,
                    stored.source_ip,
                    stored.destination_ip,
                    stored.port,
                    stored.protocol,
                    stored.process_name,
                    stored.process_pid,
                    stored.status.as_str(),
                    ts(stored.created_at),
                    stored.resolved_at.map(ts),
                ],
            )?;
        }

        log::debug!("[ThreatPersistence] Saved threat {}", stored.id);
        self.publish(ChangeEvent::Inserted(stored.clone()));
        Ok(stored)
    }

    async fn query(
        &self,
        filter: &ThreatFilter,
        limit: usize,
        order: Order,
    ) -> Result<Vec<StoredThreat>, StoreError> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(severity) = filter.severity {
            values.push(severity.as_str().to_string());
            clauses.push(format!("severity = ?{}", values.len()));
        }
        if let Some(status) = filter.status {
            values.push(status.as_str().to_string());
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(agent_id) = &filter.agent_id {
            values.push(agent_id.clone());
            clauses.push(format!("agent_id = ?{}", values.len()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let dir = match order {
            Order::NewestFirst => "DESC",
            Order::OldestFirst => "ASC",
        };
        let sql = format!(
            "SELECT {} FROM detected_threats{} ORDER BY created_at {dir}, rowid {dir} LIMIT {}",
            COLUMNS,
            where_sql,
            limit,
            dir = dir
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn update(&self, id: &str, patch: ThreatPatch) -> Result<Option<StoredThreat>, StoreError> {
        let updated = {
            let conn = self.conn.lock();

            let mut sets = Vec::new();
            let mut values: Vec<Option<String>> = Vec::new();
            if let Some(status) = patch.status {
                values.push(Some(status.as_str().to_string()));
                sets.push(format!("status = ?{}", values.len()));
            }
            if let Some(resolved_at) = patch.resolved_at {
                values.push(resolved_at.map(ts));
                sets.push(format!("resolved_at = ?{}", values.len()));
            }

            if !sets.is_empty() {
                values.push(Some(id.to_string()));
                let sql = format!(
                    "UPDATE detected_threats SET {} WHERE id = ?{}",
                    sets.join(", "),
                    values.len()
                );
                let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
                if changed == 0 {
                    return Ok(None);
                }
            }

            Self::fetch(&conn, id)?
        };

        if let Some(row) = &updated {
            self.publish(ChangeEvent::Updated(row.clone()));
        }
        Ok(updated)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
