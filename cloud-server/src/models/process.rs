//! Process snapshot model

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SystemProcess {
    pub id: Uuid,
    pub agent_id: String,
    pub pid: i32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub status: String,
    pub user_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProcessInfo {
    #[validate(range(min = 0))]
    pub pid: i32,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    #[validate(length(max = 50))]
    pub status: String,
    pub user_name: Option<String>,
}

impl SystemProcess {
    /// Replace the agent's previous snapshot with `processes`
    pub async fn replace_for_agent(
        pool: &PgPool,
        agent_id: &str,
        processes: &[ProcessInfo],
    ) -> Result<usize, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM system_processes WHERE agent_id = $1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

        for process in processes {
            sqlx::query(
                r#"
                INSERT INTO system_processes (agent_id, pid, name, cpu_percent, memory_percent, status, user_name)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#
            )
            .bind(agent_id)
            .bind(process.pid)
            .bind(&process.name)
            .bind(process.cpu_percent)
            .bind(process.memory_percent)
            .bind(&process.status)
            .bind(&process.user_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(processes.len())
    }

    /// Busiest processes first
    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, SystemProcess>(
            "SELECT * FROM system_processes ORDER BY cpu_percent DESC"
        )
        .fetch_all(pool)
        .await
    }
}
