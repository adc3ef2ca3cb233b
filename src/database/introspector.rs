//! Schema Introspector
//!
//! Walks vendor metadata over a single connection and assembles a
//! [`SchemaDocument`]. Tables are visited one after another; the first
//! failure aborts the whole discovery so callers only ever see a complete
//! document.

use crate::database::connection::{release, Connector, SqlSession};
use crate::database::datasource::ConnectTarget;
use crate::database::schema::{SchemaDocument, TableDescriptor};
use crate::error::{QueryHubError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct SchemaIntrospector {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
}

impl SchemaIntrospector {
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
        }
    }

    /// Discover the schema of `target`.
    ///
    /// Fails with [`QueryHubError::Connectivity`] when the connection cannot be
    /// opened or any metadata query fails.
    pub async fn discover(&self, target: &ConnectTarget) -> Result<SchemaDocument> {
        let started = Instant::now();
        info!(
            data_source = %target.data_source_id,
            kind = %target.kind,
            database = %target.database,
            "discovering schema"
        );

        let mut session = self.connector.connect(target, self.connect_timeout).await?;
        let walked = walk(session.as_mut(), target).await;
        release(session).await;

        match walked {
            Ok(document) => {
                info!(
                    data_source = %target.data_source_id,
                    tables = document.tables.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "schema discovered"
                );
                Ok(document)
            }
            Err(e) => {
                warn!(data_source = %target.data_source_id, error = %e, "schema discovery failed");
                Err(match e {
                    QueryHubError::Sql(message) => QueryHubError::Connectivity(message),
                    QueryHubError::Timeout(after) => {
                        QueryHubError::Connectivity(format!("metadata read timed out after {}s", after.as_secs()))
                    }
                    other => other,
                })
            }
        }
    }
}

async fn walk(session: &mut dyn SqlSession, target: &ConnectTarget) -> Result<SchemaDocument> {
    let database = target.database.as_str();
    let entries = session.tables(database).await?;

    let mut tables = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut table = TableDescriptor::new(entry.name, entry.kind);
        table.columns = session.columns(database, &table.name).await?;
        table.primary_keys = session.primary_keys(database, &table.name).await?;
        table.foreign_keys = session.foreign_keys(database, &table.name).await?;
        tables.push(table);
    }

    Ok(SchemaDocument::new(target.kind, database, tables))
}
