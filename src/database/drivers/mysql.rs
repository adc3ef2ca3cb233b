//! MySQL session
//!
//! Metadata comes from `information_schema`, filtered to the configured
//! database. Catalog values are cast so they decode as plain strings and
//! signed integers regardless of server version.

use super::{fetch_capped, hex, metadata_error, TABLE_KIND};
use crate::database::connection::{SqlSession, TableEntry};
use crate::database::datasource::ConnectTarget;
use crate::database::dialect::DatabaseKind;
use crate::database::schema::{ColumnDescriptor, ForeignKeyDescriptor};
use crate::error::{QueryHubError, Result};
use crate::query::result::StatementOutcome;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlConnection, MySqlQueryResult, MySqlRow};
use sqlx::{Column, Connection, Executor, Row, TypeInfo};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub struct MySqlSession {
    conn: MySqlConnection,
}

impl MySqlSession {
    pub async fn connect(target: &ConnectTarget) -> Result<Self> {
        let options = MySqlConnectOptions::from_str(&target.connection_string())
            .map_err(QueryHubError::connect_sqlx)?
            .username(&target.credentials.username)
            .password(&target.credentials.password);

        let conn = MySqlConnection::connect_with(&options)
            .await
            .map_err(QueryHubError::connect_sqlx)?;
        Ok(Self { conn })
    }

    /// Server-side statement timeout. MySQL and MariaDB spell it differently
    /// and neither is fatal when missing.
    async fn set_statement_timeout(&mut self, timeout: Duration) {
        let mysql = format!("SET SESSION MAX_EXECUTION_TIME = {}", timeout.as_millis());
        if let Err(e) = (&mut self.conn).execute(mysql.as_str()).await {
            debug!(error = %e, "MAX_EXECUTION_TIME not supported, trying max_statement_time");
            let mariadb = format!("SET SESSION max_statement_time = {}", timeout.as_secs_f64());
            if let Err(e) = (&mut self.conn).execute(mariadb.as_str()).await {
                debug!(error = %e, "server-side statement timeout unavailable");
            }
        }
    }
}

#[async_trait]
impl SqlSession for MySqlSession {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::MySql
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn.ping().await.map_err(QueryHubError::connect_sqlx)
    }

    async fn run(&mut self, sql: &str, max_rows: Option<usize>, timeout: Duration) -> Result<StatementOutcome> {
        self.set_statement_timeout(timeout).await;

        fetch_capped::<MySql>(
            &mut self.conn,
            sql,
            max_rows,
            timeout,
            MySqlQueryResult::rows_affected,
            decode_row,
        )
        .await
    }

    async fn tables(&mut self, database: &str) -> Result<Vec<TableEntry>> {
        let query = r#"
            SELECT CAST(TABLE_NAME AS CHAR) AS table_name
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ?
                AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#;

        let rows = sqlx::query(query)
            .bind(database)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| metadata_error("tables", e))?;

        rows.iter()
            .map(|row| {
                Ok(TableEntry {
                    name: row.try_get("table_name").map_err(|e| metadata_error("tables", e))?,
                    kind: TABLE_KIND.to_string(),
                })
            })
            .collect()
    }

    async fn columns(&mut self, database: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let query = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR) AS column_name,
                CAST(DATA_TYPE AS CHAR) AS type_name,
                CAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, DATETIME_PRECISION) AS SIGNED) AS column_size,
                CAST(IS_NULLABLE AS CHAR) AS is_nullable,
                CAST(COLUMN_DEFAULT AS CHAR) AS column_default
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ?
                AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = sqlx::query(query)
            .bind(database)
            .bind(table)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| metadata_error("columns", e))?;

        rows.iter()
            .map(|row| {
                let is_nullable: String = row.try_get("is_nullable").map_err(|e| metadata_error("columns", e))?;
                Ok(ColumnDescriptor {
                    name: row.try_get("column_name").map_err(|e| metadata_error("columns", e))?,
                    type_name: row.try_get("type_name").map_err(|e| metadata_error("columns", e))?,
                    size: row.try_get("column_size").map_err(|e| metadata_error("columns", e))?,
                    nullable: is_nullable == "YES",
                    default_value: row.try_get("column_default").map_err(|e| metadata_error("columns", e))?,
                })
            })
            .collect()
    }

    async fn primary_keys(&mut self, database: &str, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT CAST(COLUMN_NAME AS CHAR) AS column_name
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ?
                AND TABLE_NAME = ?
                AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = sqlx::query(query)
            .bind(database)
            .bind(table)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| metadata_error("primary keys", e))?;

        rows.iter()
            .map(|row| row.try_get("column_name").map_err(|e| metadata_error("primary keys", e)))
            .collect()
    }

    async fn foreign_keys(&mut self, database: &str, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let query = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR) AS column_name,
                CAST(REFERENCED_TABLE_NAME AS CHAR) AS foreign_table_name,
                CAST(REFERENCED_COLUMN_NAME AS CHAR) AS foreign_column_name
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ?
                AND TABLE_NAME = ?
                AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY REFERENCED_TABLE_NAME, ORDINAL_POSITION
        "#;

        let rows = sqlx::query(query)
            .bind(database)
            .bind(table)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| metadata_error("foreign keys", e))?;

        rows.iter()
            .map(|row| {
                Ok(ForeignKeyDescriptor {
                    column: row.try_get("column_name").map_err(|e| metadata_error("foreign keys", e))?,
                    referenced_table: row
                        .try_get("foreign_table_name")
                        .map_err(|e| metadata_error("foreign keys", e))?,
                    referenced_column: row
                        .try_get("foreign_column_name")
                        .map_err(|e| metadata_error("foreign keys", e))?,
                })
            })
            .collect()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().await.map_err(QueryHubError::connect_sqlx)
    }
}

fn decode_row(row: &MySqlRow) -> Vec<Value> {
    (0..row.columns().len()).map(|idx| decode_value(row, idx)).collect()
}

fn decode_value(row: &MySqlRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_info().name().to_ascii_uppercase();

    let typed = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<Option<bool>, _>(idx).ok().map(|v| v.map(Value::from)),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(idx).ok().map(|v| v.map(Value::from))
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED" | "BIGINT UNSIGNED" => {
            row.try_get::<Option<u64>, _>(idx).ok().map(|v| v.map(Value::from))
        }
        "FLOAT" => row.try_get::<Option<f32>, _>(idx).ok().map(|v| v.map(Value::from)),
        "DOUBLE" => row.try_get::<Option<f64>, _>(idx).ok().map(|v| v.map(Value::from)),
        _ => None,
    };
    if let Some(value) = typed {
        return value.unwrap_or(Value::Null);
    }

    match row.try_get_unchecked::<Option<String>, _>(idx) {
        Ok(None) => Value::Null,
        Ok(Some(text)) if type_name == "JSON" => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        Ok(Some(text)) => Value::String(text),
        Err(_) => match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
            Ok(Some(bytes)) => Value::String(hex(&bytes)),
            _ => Value::Null,
        },
    }
}
