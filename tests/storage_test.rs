//! SQLite-backed stores and the local bootstrap

mod common;

use common::{alice, rows, sample_tables, FakeConnector, RunScript};
use query_hub::config::{AppState, Config, EngineConfig};
use query_hub::database::cache::{MemorySchemaStore, SchemaCache, SchemaStore, SqliteSchemaStore};
use query_hub::database::connection::Connector;
use query_hub::database::datasource::{DataSourceId, Principal};
use query_hub::database::dialect::DatabaseKind;
use query_hub::database::schema::SchemaDocument;
use query_hub::query::history::{ExecutionLog, ExecutionStatus, SqliteExecutionLog};
use query_hub::storage::open_pool;
use query_hub::{QueryHub, QueryRequest};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn document(name: &str) -> SchemaDocument {
    SchemaDocument::new(DatabaseKind::PostgreSql, name, sample_tables())
}

#[tokio::test]
async fn test_sqlite_schema_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(&dir.path().join("hub.db")).await.unwrap();
    let store: Arc<dyn SchemaStore> = Arc::new(SqliteSchemaStore::new(pool).await.unwrap());
    let cache = SchemaCache::new(store.clone(), Duration::from_secs(3600));
    let id = DataSourceId::new();
    let shop = document("shop");

    cache.put(&id, &shop).await.unwrap();
    assert_eq!(cache.get(&id).await.unwrap(), Some(shop));

    let stored = store.load(&id).await.unwrap().unwrap();
    assert_eq!(stored.expires_at - stored.cached_at, chrono::Duration::hours(1));

    cache.invalidate(&id).await.unwrap();
    assert!(cache.get(&id).await.unwrap().is_none());
    assert!(store.load(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sqlite_schema_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hub.db");
    let id = DataSourceId::new();
    let shop = document("shop");

    {
        let pool = open_pool(&path).await.unwrap();
        let store = Arc::new(SqliteSchemaStore::new(pool.clone()).await.unwrap());
        SchemaCache::new(store, Duration::from_secs(3600)).put(&id, &shop).await.unwrap();
        pool.close().await;
    }

    let pool = open_pool(&path).await.unwrap();
    let store = Arc::new(SqliteSchemaStore::new(pool).await.unwrap());
    let cache = SchemaCache::new(store, Duration::from_secs(3600));
    assert_eq!(cache.get(&id).await.unwrap(), Some(shop));
}

#[tokio::test]
async fn test_concurrent_puts_leave_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(&dir.path().join("hub.db")).await.unwrap();
    let cache = Arc::new(SchemaCache::new(
        Arc::new(SqliteSchemaStore::new(pool.clone()).await.unwrap()),
        Duration::from_secs(3600),
    ));
    let id = DataSourceId::new();

    let mut handles = Vec::new();
    for i in 0..8 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            cache.put(&id, &document(&format!("db{}", i))).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schema_cache")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let cached = cache.get(&id).await.unwrap().unwrap();
    assert!(cached.database_name.starts_with("db"));
}

#[tokio::test]
async fn test_concurrent_puts_in_memory() {
    let store = Arc::new(MemorySchemaStore::new());
    let cache = Arc::new(SchemaCache::new(store.clone(), Duration::from_secs(60)));
    let id = DataSourceId::new();

    let puts = (0..8).map(|i| {
        let cache = Arc::clone(&cache);
        async move { cache.put(&id, &document(&format!("db{}", i))).await }
    });
    for result in futures::future::join_all(puts).await {
        result.unwrap();
    }

    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_sqlite_execution_log_through_hub() {
    let dir = tempfile::tempdir().unwrap();
    let pool = open_pool(&dir.path().join("hub.db")).await.unwrap();
    let log = Arc::new(SqliteExecutionLog::new(pool).await.unwrap());

    let connector = FakeConnector::new();
    connector.set_run(RunScript::Outcome(rows(4)));
    let hub = QueryHub::builder(EngineConfig::default())
        .connector(connector.clone() as Arc<dyn Connector>)
        .execution_log(log.clone())
        .build();
    let source = hub
        .create_data_source(common::new_source("warehouse", DatabaseKind::PostgreSql), &alice())
        .await
        .unwrap();

    let ok = hub
        .execute_query(QueryRequest::new(source.id, "SELECT * FROM orders").with_limit(2), &alice())
        .await
        .unwrap();
    connector.set_run(RunScript::SqlError("syntax error at or near \"FORM\"".to_string()));
    let failed = hub
        .execute_query(QueryRequest::new(source.id, "SELECT * FORM orders"), &alice())
        .await
        .unwrap();

    let stored = log.get(ok.execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Success);
    assert_eq!(stored.rows, 2);
    assert_eq!(stored.data_source_id, source.id);
    assert_eq!(stored.sql_text, "SELECT * FROM orders LIMIT 2");

    let recent = hub.recent_executions(&alice(), 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].id, failed.execution_id);
    assert_eq!(recent[0].status, ExecutionStatus::Failed);
    assert_eq!(
        recent[0].error_message.as_deref(),
        Some("syntax error at or near \"FORM\"")
    );

    let saved_query_id = Uuid::new_v4();
    log.link_saved_query(ok.execution_id, saved_query_id).await.unwrap();
    assert_eq!(
        log.get(ok.execution_id).await.unwrap().unwrap().saved_query_id,
        Some(saved_query_id)
    );
    assert!(log.link_saved_query(Uuid::new_v4(), saved_query_id).await.is_err());
}

#[tokio::test]
async fn test_bootstrap_registers_configured_sources() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::parse(&format!(
        r#"
        principal = "alice"

        [storage]
        path = "{}"

        [[data_sources]]
        name = "warehouse"
        kind = "postgresql"
        host = "pg.internal"
        database = "dw"
        username = "reporter"
        secret = "env:WAREHOUSE_PASSWORD"

        [[data_sources]]
        name = "erp"
        kind = "sqlserver"
        host = "mssql.internal"
        database = "erp"
        username = "sa"
        secret = "literal"
        "#,
        dir.path().join("hub.db").display()
    ))
    .unwrap();

    let state = AppState::bootstrap(config).await.unwrap();
    assert_eq!(state.principal, Principal::new("alice"));
    assert_eq!(state.current_source_name(), Some("warehouse"));

    let sources = state.hub.list_data_sources(&state.principal).await.unwrap();
    let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["erp", "warehouse"]);
    assert_eq!(sources[0].port, 1433);
    assert!(sources.iter().all(|s| s.secret.is_empty()));
    assert!(dir.path().join("hub.db").exists());
}
