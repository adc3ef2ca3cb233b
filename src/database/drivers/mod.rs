//! Vendor drivers
//!
//! One [`SqlSession`](crate::database::connection::SqlSession) implementation
//! per supported database. PostgreSQL and MySQL go through `sqlx`, SQL Server
//! through `tiberius` and Oracle through the `oracle` client.

pub mod mssql;
pub mod mysql;
pub mod oracle;
pub mod postgres;

use crate::error::{QueryHubError, Result};
use crate::query::result::{ResultColumn, StatementOutcome, TabularResult};
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::{Column, Database, Either, Executor, Row, TypeInfo};
use std::fmt::Display;
use std::time::Duration;
use tracing::debug;

/// Kind reported for every discovered base table
pub const TABLE_KIND: &str = "TABLE";

/// Metadata read failures surface as connectivity errors
pub(crate) fn metadata_error(what: &str, err: impl Display) -> QueryHubError {
    QueryHubError::Connectivity(format!("failed to read {}: {}", what, err))
}

/// Whether a result set already holds `max_rows` rows
pub(crate) fn reached(max_rows: Option<usize>, len: usize) -> bool {
    max_rows.is_some_and(|cap| len >= cap)
}

/// Run `sql` on a sqlx connection and keep at most `max_rows` rows.
///
/// Column metadata comes from `describe` so an empty result set still reports
/// its columns; an empty column list means the statement has no result set
/// and the summed affected count is returned instead.
pub(crate) async fn fetch_capped<DB>(
    conn: &mut DB::Connection,
    sql: &str,
    max_rows: Option<usize>,
    timeout: Duration,
    rows_affected: fn(&DB::QueryResult) -> u64,
    decode_row: fn(&DB::Row) -> Vec<Value>,
) -> Result<StatementOutcome>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    let described = match (&mut *conn).describe(sql).await {
        Ok(describe) => Some(
            describe
                .columns()
                .iter()
                .enumerate()
                .map(|(i, c)| ResultColumn::new(c.name(), c.type_info().name(), describe.nullable(i).unwrap_or(true)))
                .collect::<Vec<_>>(),
        ),
        Err(e) => {
            debug!(error = %e, "describe failed, falling back to row metadata");
            None
        }
    };

    let mut table = described.filter(|c| !c.is_empty()).map(TabularResult::new);
    let mut affected = 0u64;

    let mut stream = (&mut *conn).fetch_many(sql);
    while let Some(item) = stream
        .try_next()
        .await
        .map_err(|e| QueryHubError::from_sqlx(e, timeout))?
    {
        match item {
            Either::Left(done) => affected += rows_affected(&done),
            Either::Right(row) => {
                let table = table.get_or_insert_with(|| TabularResult::new(row_columns::<DB>(&row)));
                if reached(max_rows, table.len()) {
                    break;
                }
                table.push_values(decode_row(&row));
                if reached(max_rows, table.len()) {
                    break;
                }
            }
        }
    }
    drop(stream);

    Ok(match table {
        Some(table) => StatementOutcome::Rows(table),
        None => StatementOutcome::Affected(affected),
    })
}

fn row_columns<DB: Database>(row: &DB::Row) -> Vec<ResultColumn> {
    row.columns()
        .iter()
        .map(|c| ResultColumn::new(c.name(), c.type_info().name(), true))
        .collect()
}

/// Render raw bytes the way the REPL and JSON consumers expect them
pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
