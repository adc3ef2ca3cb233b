//! Oracle session
//!
//! The `oracle` client is blocking, so every call runs on the blocking pool
//! with a shared handle to the connection. Metadata is read from the `USER_*`
//! dictionary views of the connected schema.

use super::{hex, metadata_error, reached, TABLE_KIND};
use crate::database::connection::{SqlSession, TableEntry};
use crate::database::datasource::ConnectTarget;
use crate::database::dialect::DatabaseKind;
use crate::database::schema::{ColumnDescriptor, ForeignKeyDescriptor};
use crate::error::{QueryHubError, Result};
use crate::query::result::{ResultColumn, StatementOutcome, TabularResult};
use async_trait::async_trait;
use oracle::sql_type::OracleType;
use oracle::{Connection, SqlValue};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct OracleSession {
    conn: Arc<Connection>,
    broken: bool,
}

async fn blocking<T, F>(f: F) -> Result<oracle::Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> oracle::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| QueryHubError::Unexpected(format!("oracle worker failed: {}", e)))
}

impl OracleSession {
    pub async fn connect(target: &ConnectTarget, timeout: Duration) -> Result<Self> {
        let username = target.credentials.username.clone();
        let password = target.credentials.password.clone();
        let connect_string = target.connection_string();

        let conn = blocking(move || {
            let mut conn = Connection::connect(username, password, connect_string)?;
            conn.set_autocommit(true);
            conn.set_call_timeout(Some(timeout))?;
            Ok(conn)
        })
        .await?
        .map_err(|e| QueryHubError::Connectivity(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(conn),
            broken: false,
        })
    }

    async fn metadata<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> oracle::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        blocking(move || f(&conn))
            .await?
            .map_err(|e| metadata_error(what, e))
    }
}

#[async_trait]
impl SqlSession for OracleSession {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Oracle
    }

    async fn ping(&mut self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        blocking(move || conn.ping())
            .await?
            .map_err(|e| QueryHubError::Connectivity(e.to_string()))
    }

    async fn run(&mut self, sql: &str, max_rows: Option<usize>, timeout: Duration) -> Result<StatementOutcome> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();

        let outcome = blocking(move || {
            conn.set_call_timeout(Some(timeout))?;
            let mut stmt = conn.statement(&sql).build()?;

            if !stmt.is_query() {
                stmt.execute(&[])?;
                return Ok(StatementOutcome::Affected(stmt.row_count()?));
            }

            let rows = stmt.query(&[])?;
            let columns = rows
                .column_info()
                .iter()
                .map(|c| ResultColumn::new(c.name(), c.oracle_type().to_string(), c.nullable()))
                .collect();
            let types: Vec<OracleType> = rows.column_info().iter().map(|c| c.oracle_type().clone()).collect();

            let mut table = TabularResult::new(columns);
            for row in rows {
                if reached(max_rows, table.len()) {
                    break;
                }
                let row = row?;
                let values = row
                    .sql_values()
                    .iter()
                    .zip(&types)
                    .map(|(value, oracle_type)| decode_value(value, oracle_type))
                    .collect();
                table.push_values(values);
                if reached(max_rows, table.len()) {
                    break;
                }
            }
            Ok(StatementOutcome::Rows(table))
        })
        .await?;

        outcome.map_err(|e| {
            let err = QueryHubError::from_oracle(e, timeout);
            if err.is_timeout() {
                self.broken = true;
            }
            err
        })
    }

    async fn tables(&mut self, _database: &str) -> Result<Vec<TableEntry>> {
        self.metadata("tables", |conn| {
            conn.query_as::<String>("SELECT table_name FROM user_tables ORDER BY table_name", &[])?
                .map(|name| {
                    name.map(|name| TableEntry {
                        name,
                        kind: TABLE_KIND.to_string(),
                    })
                })
                .collect()
        })
        .await
    }

    async fn columns(&mut self, _database: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let table = table.to_string();
        self.metadata("columns", move |conn| {
            let query = r#"
                SELECT
                    column_name,
                    data_type,
                    COALESCE(data_precision, char_length, data_length),
                    nullable,
                    data_default
                FROM user_tab_columns
                WHERE table_name = :1
                ORDER BY column_id
            "#;
            conn.query_as::<(String, String, Option<i64>, String, Option<String>)>(query, &[&table])?
                .map(|row| {
                    row.map(|(name, type_name, size, nullable, default_value)| ColumnDescriptor {
                        name,
                        type_name,
                        size,
                        nullable: nullable == "Y",
                        default_value: default_value.map(|d| d.trim().to_string()),
                    })
                })
                .collect()
        })
        .await
    }

    async fn primary_keys(&mut self, _database: &str, table: &str) -> Result<Vec<String>> {
        let table = table.to_string();
        self.metadata("primary keys", move |conn| {
            let query = r#"
                SELECT cols.column_name
                FROM user_constraints cons
                JOIN user_cons_columns cols ON cons.constraint_name = cols.constraint_name
                WHERE cons.constraint_type = 'P'
                    AND cons.table_name = :1
                ORDER BY cols.position
            "#;
            conn.query_as::<String>(query, &[&table])?.collect()
        })
        .await
    }

    async fn foreign_keys(&mut self, _database: &str, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let table = table.to_string();
        self.metadata("foreign keys", move |conn| {
            let query = r#"
                SELECT a.column_name, pk.table_name, b.column_name
                FROM user_cons_columns a
                JOIN user_constraints c ON a.constraint_name = c.constraint_name
                JOIN user_constraints pk ON c.r_constraint_name = pk.constraint_name
                JOIN user_cons_columns b
                    ON pk.constraint_name = b.constraint_name
                    AND b.position = a.position
                WHERE c.constraint_type = 'R'
                    AND a.table_name = :1
                ORDER BY pk.table_name, a.position
            "#;
            conn.query_as::<(String, String, String)>(query, &[&table])?
                .map(|row| {
                    row.map(|(column, referenced_table, referenced_column)| ForeignKeyDescriptor {
                        column,
                        referenced_table,
                        referenced_column,
                    })
                })
                .collect()
        })
        .await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if self.broken {
            debug!("dropping Oracle connection after timed out call");
            return Ok(());
        }
        let conn = self.conn;
        blocking(move || conn.close())
            .await?
            .map_err(|e| QueryHubError::Connectivity(e.to_string()))
    }
}

fn decode_value(value: &SqlValue, oracle_type: &OracleType) -> Value {
    if value.is_null().unwrap_or(false) {
        return Value::Null;
    }

    let typed = match oracle_type {
        OracleType::Number(_, 0) | OracleType::Int64 => value.get::<i64>().ok().map(Value::from),
        OracleType::BinaryFloat | OracleType::BinaryDouble => value.get::<f64>().ok().map(Value::from),
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => {
            value.get::<Vec<u8>>().ok().map(|bytes| Value::String(hex(&bytes)))
        }
        _ => None,
    };

    typed
        .or_else(|| value.get::<String>().ok().map(Value::String))
        .unwrap_or(Value::Null)
}
