//! Query Executor
//!
//! Runs one statement against one data source and records the attempt.
//! Driver failures (connectivity, SQL, timeout) come back as a failed
//! [`QueryResponse`]; anything else is recorded and then raised as
//! [`QueryHubError::Unexpected`].

use crate::database::connection::{release, Connector};
use crate::database::datasource::{ConnectTarget, CredentialStore, DataSourceConnection, Principal};
use crate::error::{QueryHubError, Result};
use crate::query::history::{ExecutionLog, ExecutionRecord, ExecutionStatus};
use crate::query::result::{QueryResponse, StatementOutcome};
use crate::query::sql::{apply_parameters, apply_row_limit};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Extra time granted to the driver's own timeout before the session is
/// abandoned.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// A fully resolved execution request
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub sql: String,
    pub parameters: Map<String, Value>,
    /// Row cap; `None` reads every row
    pub limit: Option<u64>,
    pub timeout: Duration,
}

impl ExecutionPlan {
    /// The statement that will reach the driver
    pub fn final_sql(&self, source: &DataSourceConnection) -> String {
        let sql = apply_parameters(&self.sql, &self.parameters);
        match self.limit {
            Some(limit) => apply_row_limit(source.kind, &sql, limit),
            None => sql,
        }
    }
}

pub struct QueryExecutor {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialStore>,
    log: Arc<dyn ExecutionLog>,
    connect_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        log: Arc<dyn ExecutionLog>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            credentials,
            log,
            connect_timeout,
        }
    }

    /// Execute `plan` against `source` and record exactly one execution.
    pub async fn execute(
        &self,
        source: &DataSourceConnection,
        principal: &Principal,
        plan: &ExecutionPlan,
    ) -> Result<QueryResponse> {
        let started = Instant::now();
        let executed_at = Utc::now();
        let sql_text = plan.final_sql(source);

        let outcome = self.attempt(source, principal, &sql_text, plan).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut response = QueryResponse {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Success,
            columns: None,
            rows: None,
            rows_returned: 0,
            elapsed_ms,
            error_message: None,
        };
        let mut fatal = None;

        match outcome {
            Ok(StatementOutcome::Rows(mut table)) => {
                if let Some(limit) = plan.limit {
                    table.rows.truncate(limit as usize);
                }
                response.rows_returned = table.rows.len() as u64;
                response.columns = Some(table.columns);
                response.rows = Some(table.rows);
            }
            Ok(StatementOutcome::Affected(count)) => {
                response.rows_returned = count;
                response.columns = Some(Vec::new());
                response.rows = Some(Vec::new());
            }
            Err(e) if e.is_timeout() => {
                response.status = ExecutionStatus::TimedOut;
                response.error_message = Some(e.to_string());
            }
            Err(e) if e.is_driver_failure() => {
                response.status = ExecutionStatus::Failed;
                response.error_message = Some(e.to_string());
            }
            Err(e) => {
                let detail = match e {
                    QueryHubError::Unexpected(detail) => detail,
                    other => other.to_string(),
                };
                let raised = QueryHubError::Unexpected(detail);
                response.status = ExecutionStatus::Failed;
                response.error_message = Some(raised.to_string());
                fatal = Some(raised);
            }
        }

        let record = ExecutionRecord {
            id: response.execution_id,
            data_source_id: source.id,
            owner: principal.clone(),
            sql_text,
            status: response.status,
            elapsed_ms,
            rows: response.rows_returned,
            error_message: response.error_message.clone(),
            executed_at,
            saved_query_id: None,
        };
        self.log.record(&record).await?;

        match response.status {
            ExecutionStatus::Success => info!(
                execution = %record.id,
                data_source = %source.id,
                rows = record.rows,
                elapsed_ms,
                "query executed"
            ),
            status => warn!(
                execution = %record.id,
                data_source = %source.id,
                %status,
                elapsed_ms,
                error = record.error_message.as_deref().unwrap_or_default(),
                "query failed"
            ),
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    async fn attempt(
        &self,
        source: &DataSourceConnection,
        principal: &Principal,
        sql: &str,
        plan: &ExecutionPlan,
    ) -> Result<StatementOutcome> {
        let credentials = self
            .credentials
            .credentials(source, principal)
            .await
            .map_err(|e| QueryHubError::Connectivity(format!("credentials unavailable: {}", e)))?;
        let target = ConnectTarget::new(source, credentials);

        let mut session = self.connector.connect(&target, self.connect_timeout).await?;
        let max_rows = plan.limit.map(|limit| limit as usize);

        let guarded = tokio::time::timeout(
            plan.timeout.saturating_add(TIMEOUT_GRACE),
            session.run(sql, max_rows, plan.timeout),
        ).await;
        match guarded {
            Ok(outcome) => {
                release(session).await;
                outcome
            }
            Err(_) => {
                warn!(data_source = %source.id, "driver ignored statement timeout, abandoning connection");
                drop(session);
                Err(QueryHubError::Timeout(plan.timeout))
            }
        }
    }
}
