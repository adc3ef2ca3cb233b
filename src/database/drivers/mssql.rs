//! SQL Server session over `tiberius`
//!
//! SQL Server has no session-level statement timeout, so `run` enforces it on
//! the client side. A statement abandoned that way leaves the TDS stream in an
//! unknown state and the session is closed without a graceful goodbye.

use super::{hex, metadata_error, reached, TABLE_KIND};
use crate::database::connection::{SqlSession, TableEntry};
use crate::database::datasource::ConnectTarget;
use crate::database::dialect::DatabaseKind;
use crate::database::schema::{ColumnDescriptor, ForeignKeyDescriptor};
use crate::error::{QueryHubError, Result};
use crate::query::result::{ResultColumn, StatementOutcome, TabularResult};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use std::time::Duration;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, QueryItem, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

pub struct MssqlSession {
    client: Client<Compat<TcpStream>>,
    broken: bool,
}

impl MssqlSession {
    pub async fn connect(target: &ConnectTarget) -> Result<Self> {
        let mut config = Config::from_jdbc_string(&target.connection_string())
            .map_err(|e| QueryHubError::Connectivity(e.to_string()))?;
        config.authentication(AuthMethod::sql_server(
            &target.credentials.username,
            &target.credentials.password,
        ));

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| QueryHubError::Connectivity(e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| QueryHubError::Connectivity(e.to_string()))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| QueryHubError::Connectivity(e.to_string()))?;

        Ok(Self { client, broken: false })
    }

    /// Result-set shape of `sql` without running it. `Some(empty)` means the
    /// statement yields no rows; `None` means the server could not tell.
    async fn describe(&mut self, sql: &str) -> Option<Vec<ResultColumn>> {
        let described = match self
            .client
            .query("EXEC sp_describe_first_result_set @tsql = @P1", &[&sql])
            .await
        {
            Ok(stream) => stream.into_first_result().await,
            Err(e) => Err(e),
        };

        let rows = match described {
            Ok(rows) => rows,
            Err(e) => {
                debug!(error = %e, "sp_describe_first_result_set failed");
                return None;
            }
        };

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            if row.try_get::<bool, _>("is_hidden").ok().flatten().unwrap_or(false) {
                continue;
            }
            let name = row.try_get::<&str, _>("name").ok().flatten().unwrap_or_default();
            let type_name = row
                .try_get::<&str, _>("system_type_name")
                .ok()
                .flatten()
                .unwrap_or_default();
            let nullable = row.try_get::<bool, _>("is_nullable").ok().flatten().unwrap_or(true);
            columns.push(ResultColumn::new(name, type_name, nullable));
        }
        Some(columns)
    }

    async fn run_statement(&mut self, sql: &str, max_rows: Option<usize>) -> Result<StatementOutcome> {
        let mut described = self.describe(sql).await;

        if matches!(described.as_deref(), Some([])) {
            let result = self
                .client
                .execute(sql, &[])
                .await
                .map_err(QueryHubError::from_tiberius)?;
            return Ok(StatementOutcome::Affected(result.total()));
        }

        let mut stream = self
            .client
            .simple_query(sql)
            .await
            .map_err(QueryHubError::from_tiberius)?;

        let mut table: Option<TabularResult> = None;
        while let Some(item) = stream.try_next().await.map_err(QueryHubError::from_tiberius)? {
            match item {
                QueryItem::Metadata(meta) if meta.result_index() == 0 => {
                    let reported: Vec<ResultColumn> = meta
                        .columns()
                        .iter()
                        .map(|c| ResultColumn::new(c.name(), format!("{:?}", c.column_type()), true))
                        .collect();
                    table = Some(TabularResult::new(merge_columns(reported, described.take())));
                }
                QueryItem::Row(row) if row.result_index() == 0 => {
                    let Some(table) = table.as_mut() else { continue };
                    if reached(max_rows, table.len()) {
                        break;
                    }
                    table.push_values(decode_row(&row));
                    if reached(max_rows, table.len()) {
                        break;
                    }
                }
                _ => {}
            }
        }
        drop(stream);

        Ok(match table {
            Some(table) => StatementOutcome::Rows(table),
            None => StatementOutcome::Affected(0),
        })
    }

    async fn fetch(&mut self, what: &str, query: &str, database: &str, table: Option<&str>) -> Result<Vec<Row>> {
        let stream = match table {
            Some(table) => self.client.query(query, &[&database, &table]).await,
            None => self.client.query(query, &[&database]).await,
        }
        .map_err(|e| metadata_error(what, e))?;

        stream.into_first_result().await.map_err(|e| metadata_error(what, e))
    }
}

#[async_trait]
impl SqlSession for MssqlSession {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::SqlServer
    }

    async fn ping(&mut self) -> Result<()> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| QueryHubError::Connectivity(e.to_string()))?
            .into_row()
            .await
            .map_err(|e| QueryHubError::Connectivity(e.to_string()))?;
        Ok(())
    }

    async fn run(&mut self, sql: &str, max_rows: Option<usize>, timeout: Duration) -> Result<StatementOutcome> {
        match tokio::time::timeout(timeout, self.run_statement(sql, max_rows)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.broken = true;
                Err(QueryHubError::Timeout(timeout))
            }
        }
    }

    async fn tables(&mut self, database: &str) -> Result<Vec<TableEntry>> {
        let query = r#"
            SELECT TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_CATALOG = @P1
                AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_SCHEMA, TABLE_NAME
        "#;

        let rows = self.fetch("tables", query, database, None).await?;
        rows.iter()
            .map(|row| {
                Ok(TableEntry {
                    name: required(row, "TABLE_NAME", "tables")?,
                    kind: TABLE_KIND.to_string(),
                })
            })
            .collect()
    }

    async fn columns(&mut self, database: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let query = r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, DATETIME_PRECISION) AS BIGINT) AS COLUMN_SIZE,
                IS_NULLABLE,
                COLUMN_DEFAULT
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_CATALOG = @P1
                AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = self.fetch("columns", query, database, Some(table)).await?;
        rows.iter()
            .map(|row| {
                Ok(ColumnDescriptor {
                    name: required(row, "COLUMN_NAME", "columns")?,
                    type_name: required(row, "DATA_TYPE", "columns")?,
                    size: row
                        .try_get::<i64, _>("COLUMN_SIZE")
                        .map_err(|e| metadata_error("columns", e))?,
                    nullable: required(row, "IS_NULLABLE", "columns")? == "YES",
                    default_value: row
                        .try_get::<&str, _>("COLUMN_DEFAULT")
                        .map_err(|e| metadata_error("columns", e))?
                        .map(str::to_string),
                })
            })
            .collect()
    }

    async fn primary_keys(&mut self, database: &str, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT kcu.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS AS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE AS kcu
                ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
                AND tc.TABLE_CATALOG = @P1
                AND tc.TABLE_NAME = @P2
            ORDER BY kcu.ORDINAL_POSITION
        "#;

        let rows = self.fetch("primary keys", query, database, Some(table)).await?;
        rows.iter()
            .map(|row| required(row, "COLUMN_NAME", "primary keys"))
            .collect()
    }

    async fn foreign_keys(&mut self, database: &str, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let query = r#"
            SELECT
                pc.name AS column_name,
                rt.name AS foreign_table_name,
                rc.name AS foreign_column_name
            FROM sys.foreign_key_columns AS fkc
            JOIN sys.tables AS t ON t.object_id = fkc.parent_object_id
            JOIN sys.columns AS pc
                ON pc.object_id = fkc.parent_object_id
                AND pc.column_id = fkc.parent_column_id
            JOIN sys.tables AS rt ON rt.object_id = fkc.referenced_object_id
            JOIN sys.columns AS rc
                ON rc.object_id = fkc.referenced_object_id
                AND rc.column_id = fkc.referenced_column_id
            WHERE DB_NAME() = @P1
                AND t.name = @P2
            ORDER BY rt.name, fkc.constraint_column_id
        "#;

        let rows = self.fetch("foreign keys", query, database, Some(table)).await?;
        rows.iter()
            .map(|row| {
                Ok(ForeignKeyDescriptor {
                    column: required(row, "column_name", "foreign keys")?,
                    referenced_table: required(row, "foreign_table_name", "foreign keys")?,
                    referenced_column: required(row, "foreign_column_name", "foreign keys")?,
                })
            })
            .collect()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if self.broken {
            debug!("dropping SQL Server connection after abandoned statement");
            return Ok(());
        }
        self.client
            .close()
            .await
            .map_err(|e| QueryHubError::Connectivity(e.to_string()))
    }
}

fn required(row: &Row, column: &str, what: &str) -> Result<String> {
    row.try_get::<&str, _>(column)
        .map_err(|e| metadata_error(what, e))?
        .map(str::to_string)
        .ok_or_else(|| metadata_error(what, format!("{} is null", column)))
}

/// Names come from the stream; types and nullability from the describe call
/// when both agree on the column count.
fn merge_columns(reported: Vec<ResultColumn>, described: Option<Vec<ResultColumn>>) -> Vec<ResultColumn> {
    match described {
        Some(described) if described.len() == reported.len() => reported
            .into_iter()
            .zip(described)
            .map(|(r, d)| ResultColumn::new(r.name, d.type_name, d.nullable))
            .collect(),
        _ => reported,
    }
}

fn decode_row(row: &Row) -> Vec<Value> {
    row.cells().map(|(_, data)| decode_value(data)).collect()
}

fn decode_value(data: &ColumnData<'static>) -> Value {
    let value = match data {
        ColumnData::U8(v) => v.map(Value::from),
        ColumnData::I16(v) => v.map(Value::from),
        ColumnData::I32(v) => v.map(Value::from),
        ColumnData::I64(v) => v.map(Value::from),
        ColumnData::F32(v) => v.map(Value::from),
        ColumnData::F64(v) => v.map(Value::from),
        ColumnData::Bit(v) => v.map(Value::from),
        ColumnData::String(v) => v.as_ref().map(|s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.map(|g| Value::String(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| Value::String(hex(b))),
        ColumnData::Numeric(v) => v.map(|n| Value::String(n.to_string())),
        other => match chrono::NaiveDateTime::from_sql(other) {
            Ok(v) => v.map(|dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())),
            Err(_) => Some(Value::String(format!("{:?}", other))),
        },
    };
    value.unwrap_or(Value::Null)
}
