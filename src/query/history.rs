//! Execution history
//!
//! One [`ExecutionRecord`] per execution attempt. Records are append-only; the
//! single permitted change is linking a record to the saved query that
//! triggered it.

use crate::database::datasource::{DataSourceId, Principal};
use crate::error::{QueryHubError, Result};
use crate::storage::{from_sql_timestamp, to_sql_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;
use uuid::Uuid;

/// Terminal state of an execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMEOUT")]
    TimedOut,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::TimedOut => "TIMEOUT",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = QueryHubError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "TIMEOUT" => Ok(ExecutionStatus::TimedOut),
            other => Err(QueryHubError::Storage(format!("unknown execution status '{}'", other))),
        }
    }
}

/// Durable log entry of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub data_source_id: DataSourceId,
    pub owner: Principal,
    /// SQL as sent to the driver, after substitution and limiting
    pub sql_text: String,
    pub status: ExecutionStatus,
    pub elapsed_ms: u64,
    /// Rows returned, or rows affected for statements without a result set
    pub rows: u64,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub saved_query_id: Option<Uuid>,
}

/// Sink and query surface for execution records
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn record(&self, record: &ExecutionRecord) -> Result<()>;

    /// Attach an existing record to the saved query that produced it
    async fn link_saved_query(&self, execution_id: Uuid, saved_query_id: Uuid) -> Result<()>;

    async fn get(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>>;

    /// Most recent records of `owner`, newest first
    async fn recent(&self, owner: &Principal, limit: usize) -> Result<Vec<ExecutionRecord>>;
}

/// Process-local execution log
#[derive(Default)]
pub struct MemoryExecutionLog {
    records: RwLock<Vec<ExecutionRecord>>,
}

impl MemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, oldest first
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    fn poisoned() -> QueryHubError {
        QueryHubError::Unexpected("execution log lock poisoned".to_string())
    }
}

#[async_trait]
impl ExecutionLog for MemoryExecutionLog {
    async fn record(&self, record: &ExecutionRecord) -> Result<()> {
        self.records.write().map_err(|_| Self::poisoned())?.push(record.clone());
        Ok(())
    }

    async fn link_saved_query(&self, execution_id: Uuid, saved_query_id: Uuid) -> Result<()> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let record = records
            .iter_mut()
            .find(|r| r.id == execution_id)
            .ok_or_else(|| QueryHubError::not_found("QueryExecution", execution_id))?;
        record.saved_query_id = Some(saved_query_id);
        Ok(())
    }

    async fn get(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.iter().find(|r| r.id == execution_id).cloned())
    }

    async fn recent(&self, owner: &Principal, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records
            .iter()
            .rev()
            .filter(|r| &r.owner == owner)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Execution log stored in the local SQLite file
pub struct SqliteExecutionLog {
    pool: SqlitePool,
}

impl SqliteExecutionLog {
    /// Create the `query_executions` table if needed
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS query_executions (
                id TEXT PRIMARY KEY NOT NULL,
                data_source_id TEXT NOT NULL,
                owner TEXT NOT NULL,
                sql_text TEXT NOT NULL,
                status TEXT NOT NULL,
                elapsed_ms INTEGER NOT NULL,
                rows_returned INTEGER NOT NULL,
                error_message TEXT,
                executed_at TEXT NOT NULL,
                saved_query_id TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| QueryHubError::storage("Failed to create execution table", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_owner ON query_executions(owner, executed_at)")
            .execute(&pool)
            .await
            .map_err(|e| QueryHubError::storage("Failed to create execution index", e))?;

        Ok(Self { pool })
    }

    fn from_row(row: &SqliteRow) -> Result<ExecutionRecord> {
        let column = |e: sqlx::Error| QueryHubError::storage("Failed to read execution", e);

        let id: String = row.try_get("id").map_err(column)?;
        let data_source_id: String = row.try_get("data_source_id").map_err(column)?;
        let status: String = row.try_get("status").map_err(column)?;
        let executed_at: String = row.try_get("executed_at").map_err(column)?;
        let saved_query_id: Option<String> = row.try_get("saved_query_id").map_err(column)?;
        let elapsed_ms: i64 = row.try_get("elapsed_ms").map_err(column)?;
        let rows: i64 = row.try_get("rows_returned").map_err(column)?;

        Ok(ExecutionRecord {
            id: parse_uuid(&id)?,
            data_source_id: DataSourceId(parse_uuid(&data_source_id)?),
            owner: Principal(row.try_get("owner").map_err(column)?),
            sql_text: row.try_get("sql_text").map_err(column)?,
            status: status.parse()?,
            elapsed_ms: elapsed_ms.max(0) as u64,
            rows: rows.max(0) as u64,
            error_message: row.try_get("error_message").map_err(column)?,
            executed_at: from_sql_timestamp(&executed_at)?,
            saved_query_id: saved_query_id.as_deref().map(parse_uuid).transpose()?,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| QueryHubError::Storage(format!("invalid id '{}': {}", raw, e)))
}

#[async_trait]
impl ExecutionLog for SqliteExecutionLog {
    async fn record(&self, record: &ExecutionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO query_executions
                (id, data_source_id, owner, sql_text, status, elapsed_ms, rows_returned, error_message, executed_at, saved_query_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.data_source_id.to_string())
        .bind(&record.owner.0)
        .bind(&record.sql_text)
        .bind(record.status.as_str())
        .bind(record.elapsed_ms as i64)
        .bind(record.rows as i64)
        .bind(&record.error_message)
        .bind(to_sql_timestamp(record.executed_at))
        .bind(record.saved_query_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await
        .map_err(|e| QueryHubError::storage("Failed to record execution", e))?;
        Ok(())
    }

    async fn link_saved_query(&self, execution_id: Uuid, saved_query_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE query_executions SET saved_query_id = ? WHERE id = ?")
            .bind(saved_query_id.to_string())
            .bind(execution_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| QueryHubError::storage("Failed to link execution", e))?;

        if result.rows_affected() == 0 {
            return Err(QueryHubError::not_found("QueryExecution", execution_id));
        }
        Ok(())
    }

    async fn get(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query("SELECT * FROM query_executions WHERE id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| QueryHubError::storage("Failed to load execution", e))?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn recent(&self, owner: &Principal, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM query_executions WHERE owner = ? ORDER BY executed_at DESC, rowid DESC LIMIT ?",
        )
        .bind(&owner.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueryHubError::storage("Failed to list executions", e))?;

        rows.iter().map(Self::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(owner: &str, status: ExecutionStatus) -> ExecutionRecord {
        ExecutionRecord {
            id: Uuid::new_v4(),
            data_source_id: DataSourceId::new(),
            owner: Principal::new(owner),
            sql_text: "SELECT 1".to_string(),
            status,
            elapsed_ms: 3,
            rows: 1,
            error_message: None,
            executed_at: Utc::now(),
            saved_query_id: None,
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [ExecutionStatus::Success, ExecutionStatus::Failed, ExecutionStatus::TimedOut] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert_eq!(serde_json::to_value(ExecutionStatus::TimedOut).unwrap(), "TIMEOUT");
    }

    #[tokio::test]
    async fn test_memory_log_recent_is_owner_scoped() {
        let log = MemoryExecutionLog::new();
        let first = record("alice", ExecutionStatus::Success);
        let second = record("alice", ExecutionStatus::Failed);
        log.record(&first).await.unwrap();
        log.record(&record("bob", ExecutionStatus::Success)).await.unwrap();
        log.record(&second).await.unwrap();

        let recent = log.recent(&Principal::new("alice"), 10).await.unwrap();
        assert_eq!(recent.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_memory_log_link() {
        let log = MemoryExecutionLog::new();
        let rec = record("alice", ExecutionStatus::Success);
        log.record(&rec).await.unwrap();

        let saved = Uuid::new_v4();
        log.link_saved_query(rec.id, saved).await.unwrap();
        assert_eq!(log.get(rec.id).await.unwrap().unwrap().saved_query_id, Some(saved));
        assert!(log.link_saved_query(Uuid::new_v4(), saved).await.is_err());
    }
}
