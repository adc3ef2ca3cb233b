//! PostgreSQL session
//!
//! Metadata comes from `information_schema`, filtered to the connection's
//! current schema. Statements run through the simple query protocol so any
//! column type can be read back as text.

use super::{fetch_capped, hex, metadata_error, TABLE_KIND};
use crate::database::connection::{SqlSession, TableEntry};
use crate::database::datasource::ConnectTarget;
use crate::database::dialect::DatabaseKind;
use crate::database::schema::{ColumnDescriptor, ForeignKeyDescriptor};
use crate::error::{QueryHubError, Result};
use crate::query::result::StatementOutcome;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgQueryResult, PgRow, Postgres};
use sqlx::{Column, Connection, Executor, Row, TypeInfo};
use std::str::FromStr;
use std::time::Duration;

/// Imported foreign keys, one row per local column. Referenced columns are
/// matched through the unique constraint by position so composite keys pair
/// up column for column.
const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        kcu.column_name::text AS column_name,
        pk_kcu.table_name::text AS foreign_table_name,
        pk_kcu.column_name::text AS foreign_column_name
    FROM information_schema.table_constraints AS tc
    JOIN information_schema.key_column_usage AS kcu
        ON kcu.constraint_name = tc.constraint_name
        AND kcu.constraint_schema = tc.constraint_schema
        AND kcu.table_name = tc.table_name
    JOIN information_schema.referential_constraints AS rc
        ON rc.constraint_name = tc.constraint_name
        AND rc.constraint_schema = tc.constraint_schema
    JOIN information_schema.key_column_usage AS pk_kcu
        ON pk_kcu.constraint_name = rc.unique_constraint_name
        AND pk_kcu.constraint_schema = rc.unique_constraint_schema
        AND pk_kcu.ordinal_position = kcu.position_in_unique_constraint
    WHERE tc.constraint_type = 'FOREIGN KEY'
        AND tc.table_catalog = $1
        AND tc.table_schema = current_schema()
        AND tc.table_name = $2
    ORDER BY pk_kcu.table_name, tc.constraint_name, kcu.ordinal_position
"#;

pub struct PostgresSession {
    conn: PgConnection,
}

impl PostgresSession {
    pub async fn connect(target: &ConnectTarget) -> Result<Self> {
        let options = PgConnectOptions::from_str(&target.connection_string())
            .map_err(QueryHubError::connect_sqlx)?
            .username(&target.credentials.username)
            .password(&target.credentials.password);

        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(QueryHubError::connect_sqlx)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SqlSession for PostgresSession {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::PostgreSql
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn.ping().await.map_err(QueryHubError::connect_sqlx)
    }

    async fn run(&mut self, sql: &str, max_rows: Option<usize>, timeout: Duration) -> Result<StatementOutcome> {
        let set_timeout = format!("SET statement_timeout = {}", timeout.as_millis());
        (&mut self.conn)
            .execute(set_timeout.as_str())
            .await
            .map_err(|e| QueryHubError::from_sqlx(e, timeout))?;

        fetch_capped::<Postgres>(
            &mut self.conn,
            sql,
            max_rows,
            timeout,
            PgQueryResult::rows_affected,
            decode_row,
        )
        .await
    }

    async fn tables(&mut self, database: &str) -> Result<Vec<TableEntry>> {
        let query = r#"
            SELECT table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_catalog = $1
                AND table_schema = current_schema()
                AND table_type = 'BASE TABLE'
            ORDER BY table_name
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
                column_name::text AS column_name,
                udt_name::text AS type_name,
                COALESCE(character_maximum_length, numeric_precision, datetime_precision)::bigint AS column_size,
                is_nullable::text AS is_nullable,
                column_default::text AS column_default
            FROM information_schema.columns
            WHERE table_catalog = $1
                AND table_schema = current_schema()
                AND table_name = $2
            ORDER BY ordinal_position
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
            SELECT kcu.column_name::text AS column_name
            FROM information_schema.table_constraints AS tc
            JOIN information_schema.key_column_usage AS kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
                AND tc.table_name = kcu.table_name
            WHERE tc.constraint_type = 'PRIMARY KEY'
                AND tc.table_catalog = $1
                AND tc.table_schema = current_schema()
                AND tc.table_name = $2
            ORDER BY kcu.ordinal_position
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
        let rows = sqlx::query(FOREIGN_KEYS_QUERY)
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

fn decode_row(row: &PgRow) -> Vec<Value> {
    (0..row.columns().len()).map(|idx| decode_value(row, idx)).collect()
}

fn decode_value(row: &PgRow, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_info().name().to_ascii_uppercase();

    let typed = match type_name.as_str() {
        "BOOL" => row.try_get::<Option<bool>, _>(idx).ok().map(|v| v.map(Value::from)),
        "INT2" => row.try_get::<Option<i16>, _>(idx).ok().map(|v| v.map(Value::from)),
        "INT4" => row.try_get::<Option<i32>, _>(idx).ok().map(|v| v.map(Value::from)),
        "INT8" => row.try_get::<Option<i64>, _>(idx).ok().map(|v| v.map(Value::from)),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx).ok().map(|v| v.map(Value::from)),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx).ok().map(|v| v.map(Value::from)),
        _ => None,
    };
    if let Some(value) = typed {
        return value.unwrap_or(Value::Null);
    }

    match row.try_get_unchecked::<Option<String>, _>(idx) {
        Ok(None) => Value::Null,
        Ok(Some(text)) if type_name == "JSON" || type_name == "JSONB" => {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
        Ok(Some(text)) => Value::String(text),
        Err(_) => match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
            Ok(Some(bytes)) => Value::String(hex(&bytes)),
            _ => Value::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Connects to `QUERY_HUB_TEST_POSTGRES_URL`
    async fn live_session() -> (PostgresSession, String) {
        let url = std::env::var("QUERY_HUB_TEST_POSTGRES_URL").unwrap();
        let mut conn = PgConnection::connect(&url).await.unwrap();
        let (database,): (String,) = sqlx::query_as("SELECT current_database()")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        (PostgresSession { conn }, database)
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL server at QUERY_HUB_TEST_POSTGRES_URL"]
    async fn test_run_caps_rows_and_counts_mutations() {
        let (mut session, _) = live_session().await;
        let timeout = Duration::from_secs(10);

        match session.run("SELECT n FROM generate_series(1, 50) AS n", Some(10), timeout).await.unwrap() {
            StatementOutcome::Rows(table) => {
                assert_eq!(table.len(), 10);
                assert_eq!(table.columns[0].name, "n");
            }
            other => panic!("expected rows, got {:?}", other),
        }

        session.run("CREATE TEMP TABLE qh_run (id int)", None, timeout).await.unwrap();
        let inserted = session
            .run("INSERT INTO qh_run VALUES (1), (2), (3)", None, timeout)
            .await
            .unwrap();
        assert_eq!(inserted, StatementOutcome::Affected(3));

        match session.run("SELECT id FROM qh_run WHERE id > 5", Some(10), timeout).await.unwrap() {
            StatementOutcome::Rows(table) => {
                assert_eq!(table.len(), 0);
                assert_eq!(table.columns.len(), 1);
            }
            other => panic!("expected an empty result set, got {:?}", other),
        }
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL server at QUERY_HUB_TEST_POSTGRES_URL"]
    async fn test_composite_foreign_key_pairs_columns() {
        let (mut session, database) = live_session().await;
        for statement in [
            "DROP TABLE IF EXISTS qh_fk_child",
            "DROP TABLE IF EXISTS qh_fk_parent",
            "CREATE TABLE qh_fk_parent (x int, y int, UNIQUE (x, y))",
            "CREATE TABLE qh_fk_child (a int, b int, FOREIGN KEY (a, b) REFERENCES qh_fk_parent (x, y))",
        ] {
            (&mut session.conn).execute(statement).await.unwrap();
        }

        let keys = session.foreign_keys(&database, "qh_fk_child").await.unwrap();
        let pairs: Vec<(&str, &str, &str)> = keys
            .iter()
            .map(|k| (k.column.as_str(), k.referenced_table.as_str(), k.referenced_column.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "qh_fk_parent", "x"), ("b", "qh_fk_parent", "y")]);

        (&mut session.conn).execute("DROP TABLE qh_fk_child, qh_fk_parent").await.unwrap();
    }
}
