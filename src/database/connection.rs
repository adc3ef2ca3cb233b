//! Database connection abstraction
//!
//! A [`Connector`] opens exactly one [`SqlSession`] per call. Sessions are
//! never pooled: probe, discovery and execution each own theirs and release
//! it on every exit path through [`release`].

use crate::database::datasource::ConnectTarget;
use crate::database::dialect::DatabaseKind;
use crate::database::drivers;
use crate::database::schema::{ColumnDescriptor, ForeignKeyDescriptor};
use crate::error::{QueryHubError, Result};
use crate::query::result::StatementOutcome;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// A table as listed by vendor metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub name: String,
    pub kind: String,
}

/// One open connection to a target database
#[async_trait]
pub trait SqlSession: Send {
    fn kind(&self) -> DatabaseKind;

    /// Round-trip a trivial statement
    async fn ping(&mut self) -> Result<()>;

    /// Execute one statement with a statement-level timeout, reading at most
    /// `max_rows` rows when it yields a result set.
    async fn run(&mut self, sql: &str, max_rows: Option<usize>, timeout: Duration) -> Result<StatementOutcome>;

    /// Base tables of `database`, in vendor order
    async fn tables(&mut self, database: &str) -> Result<Vec<TableEntry>>;

    async fn columns(&mut self, database: &str, table: &str) -> Result<Vec<ColumnDescriptor>>;

    async fn primary_keys(&mut self, database: &str, table: &str) -> Result<Vec<String>>;

    /// Imported foreign keys of `table`
    async fn foreign_keys(&mut self, database: &str, table: &str) -> Result<Vec<ForeignKeyDescriptor>>;

    /// Close the connection gracefully
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ConnectTarget, timeout: Duration) -> Result<Box<dyn SqlSession>>;
}

/// Connector backed by the real vendor drivers
#[derive(Debug, Default, Clone)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(&self, target: &ConnectTarget, timeout: Duration) -> Result<Box<dyn SqlSession>> {
        debug!(
            kind = %target.kind,
            target = %target.connection_string(),
            "opening connection"
        );

        let connecting = async {
            let session: Box<dyn SqlSession> = match target.kind {
                DatabaseKind::PostgreSql => Box::new(drivers::postgres::PostgresSession::connect(target).await?),
                DatabaseKind::MySql => Box::new(drivers::mysql::MySqlSession::connect(target).await?),
                DatabaseKind::SqlServer => Box::new(drivers::mssql::MssqlSession::connect(target).await?),
                DatabaseKind::Oracle => Box::new(drivers::oracle::OracleSession::connect(target, timeout).await?),
            };
            Ok::<_, QueryHubError>(session)
        };

        match tokio::time::timeout(timeout, connecting).await {
            Ok(result) => result,
            Err(_) => Err(QueryHubError::Connectivity(format!(
                "timed out after {}s connecting to {}",
                timeout.as_secs(),
                target.connection_string()
            ))),
        }
    }
}

/// Close a session, logging instead of propagating a failed close
pub async fn release(session: Box<dyn SqlSession>) {
    let kind = session.kind();
    if let Err(e) = session.close().await {
        warn!(%kind, error = %e, "failed to close connection");
    }
}
