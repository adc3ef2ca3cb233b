//! Scripted fake driver shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use query_hub::config::EngineConfig;
use query_hub::database::connection::{Connector, SqlSession, TableEntry};
use query_hub::database::datasource::{ConnectTarget, DataSourceConnection, NewDataSource, Principal};
use query_hub::database::dialect::DatabaseKind;
use query_hub::database::schema::{ColumnDescriptor, ForeignKeyDescriptor, TableDescriptor};
use query_hub::query::history::{ExecutionLog, MemoryExecutionLog};
use query_hub::query::result::{ResultColumn, StatementOutcome, TabularResult};
use query_hub::{QueryHub, QueryHubBuilder, QueryHubError, Result};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a session does when asked to run a statement
#[derive(Debug, Clone)]
pub enum RunScript {
    Outcome(StatementOutcome),
    SqlError(String),
    Timeout,
    Unexpected(String),
}

#[derive(Debug, Clone)]
struct Script {
    connect_error: Option<String>,
    run: RunScript,
    tables: Vec<TableDescriptor>,
    fail_columns_of: Option<String>,
    metadata_delay: Option<Duration>,
    ping_delay: Option<Duration>,
    run_delay: Option<Duration>,
}

/// Connector whose sessions follow a script and report what they saw
pub struct FakeConnector {
    script: Mutex<Script>,
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<(String, Option<usize>)>>>,
    timeouts: Arc<Mutex<Vec<Duration>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script {
                connect_error: None,
                run: RunScript::Outcome(StatementOutcome::Affected(0)),
                tables: sample_tables(),
                fail_columns_of: None,
                metadata_delay: None,
                ping_delay: None,
                run_delay: None,
            }),
            connects: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            executed: Arc::new(Mutex::new(Vec::new())),
            timeouts: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn set_run(&self, run: RunScript) {
        self.script.lock().unwrap().run = run;
    }

    pub fn set_connect_error(&self, message: Option<&str>) {
        self.script.lock().unwrap().connect_error = message.map(str::to_string);
    }

    pub fn set_tables(&self, tables: Vec<TableDescriptor>) {
        self.script.lock().unwrap().tables = tables;
    }

    pub fn fail_columns_of(&self, table: &str) {
        self.script.lock().unwrap().fail_columns_of = Some(table.to_string());
    }

    pub fn set_metadata_delay(&self, delay: Duration) {
        self.script.lock().unwrap().metadata_delay = Some(delay);
    }

    /// Sessions sleep this long before answering a ping
    pub fn set_ping_delay(&self, delay: Duration) {
        self.script.lock().unwrap().ping_delay = Some(delay);
    }

    /// Sessions sleep this long before answering a statement, ignoring the
    /// statement timeout they were given
    pub fn set_run_delay(&self, delay: Duration) {
        self.script.lock().unwrap().run_delay = Some(delay);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Statements that reached a session, with the row cap passed along
    pub fn executed(&self) -> Vec<(String, Option<usize>)> {
        self.executed.lock().unwrap().clone()
    }

    /// Statement timeouts handed to sessions
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, target: &ConnectTarget, _timeout: Duration) -> Result<Box<dyn SqlSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();
        if let Some(message) = script.connect_error {
            return Err(QueryHubError::Connectivity(message));
        }
        Ok(Box::new(FakeSession {
            kind: target.kind,
            script,
            closes: Arc::clone(&self.closes),
            executed: Arc::clone(&self.executed),
            timeouts: Arc::clone(&self.timeouts),
        }))
    }
}

struct FakeSession {
    kind: DatabaseKind,
    script: Script,
    closes: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<(String, Option<usize>)>>>,
    timeouts: Arc<Mutex<Vec<Duration>>>,
}

impl FakeSession {
    fn table(&self, name: &str) -> Result<&TableDescriptor> {
        self.script
            .tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| QueryHubError::Sql(format!("no such table: {}", name)))
    }
}

#[async_trait]
impl SqlSession for FakeSession {
    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    async fn ping(&mut self) -> Result<()> {
        if let Some(delay) = self.script.ping_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn run(&mut self, sql: &str, max_rows: Option<usize>, timeout: Duration) -> Result<StatementOutcome> {
        self.executed.lock().unwrap().push((sql.to_string(), max_rows));
        self.timeouts.lock().unwrap().push(timeout);
        if let Some(delay) = self.script.run_delay {
            tokio::time::sleep(delay).await;
        }
        match self.script.run.clone() {
            RunScript::Outcome(StatementOutcome::Rows(mut table)) => {
                if let Some(max) = max_rows {
                    table.rows.truncate(max);
                }
                Ok(StatementOutcome::Rows(table))
            }
            RunScript::Outcome(outcome) => Ok(outcome),
            RunScript::SqlError(message) => Err(QueryHubError::Sql(message)),
            RunScript::Timeout => Err(QueryHubError::Timeout(timeout)),
            RunScript::Unexpected(message) => Err(QueryHubError::Unexpected(message)),
        }
    }

    async fn tables(&mut self, _database: &str) -> Result<Vec<TableEntry>> {
        if let Some(delay) = self.script.metadata_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .script
            .tables
            .iter()
            .map(|t| TableEntry {
                name: t.name.clone(),
                kind: t.kind.clone(),
            })
            .collect())
    }

    async fn columns(&mut self, _database: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        if self.script.fail_columns_of.as_deref() == Some(table) {
            return Err(QueryHubError::Sql(format!("permission denied for table {}", table)));
        }
        Ok(self.table(table)?.columns.clone())
    }

    async fn primary_keys(&mut self, _database: &str, table: &str) -> Result<Vec<String>> {
        Ok(self.table(table)?.primary_keys.clone())
    }

    async fn foreign_keys(&mut self, _database: &str, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        Ok(self.table(table)?.foreign_keys.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn column(name: &str, type_name: &str, nullable: bool) -> ColumnDescriptor {
    ColumnDescriptor {
        name: name.to_string(),
        type_name: type_name.to_string(),
        size: None,
        nullable,
        default_value: None,
    }
}

/// `customers` and `orders`, with orders referencing customers
pub fn sample_tables() -> Vec<TableDescriptor> {
    let mut customers = TableDescriptor::new("customers", "TABLE");
    customers.columns = vec![column("id", "int4", false), column("email", "varchar", true)];
    customers.primary_keys = vec!["id".to_string()];

    let mut orders = TableDescriptor::new("orders", "TABLE");
    orders.columns = vec![
        column("id", "int4", false),
        column("customer_id", "int4", false),
        column("total", "numeric", true),
    ];
    orders.primary_keys = vec!["id".to_string()];
    orders.foreign_keys = vec![ForeignKeyDescriptor {
        column: "customer_id".to_string(),
        referenced_table: "customers".to_string(),
        referenced_column: "id".to_string(),
    }];

    vec![customers, orders]
}

/// A result set of `count` rows with an `id` and a `name` column
pub fn rows(count: usize) -> StatementOutcome {
    let mut table = TabularResult::new(vec![
        ResultColumn::new("id", "INT4", false),
        ResultColumn::new("name", "TEXT", true),
    ]);
    for i in 0..count {
        table.push_values(vec![json!(i), json!(format!("row-{}", i))]);
    }
    StatementOutcome::Rows(table)
}

pub fn alice() -> Principal {
    Principal::new("alice")
}

pub fn new_source(name: &str, kind: DatabaseKind) -> NewDataSource {
    NewDataSource {
        name: name.to_string(),
        kind: Some(kind),
        host: "db.internal".to_string(),
        port: None,
        database: "shop".to_string(),
        username: "reporter".to_string(),
        secret: "s3cret".to_string(),
        ..Default::default()
    }
}

/// Hub wired to `connector`, with in-memory stores and an inspectable log
pub fn hub_builder(connector: &Arc<FakeConnector>) -> (QueryHubBuilder, Arc<MemoryExecutionLog>) {
    hub_builder_with(connector, EngineConfig::default())
}

pub fn hub_builder_with(
    connector: &Arc<FakeConnector>,
    engine: EngineConfig,
) -> (QueryHubBuilder, Arc<MemoryExecutionLog>) {
    let log = Arc::new(MemoryExecutionLog::new());
    let builder = QueryHub::builder(engine)
        .connector(Arc::clone(connector) as Arc<dyn Connector>)
        .execution_log(Arc::clone(&log) as Arc<dyn ExecutionLog>);
    (builder, log)
}

/// Hub plus one PostgreSQL data source owned by alice
pub async fn hub_with_source(
    connector: &Arc<FakeConnector>,
) -> (QueryHub, Arc<MemoryExecutionLog>, DataSourceConnection) {
    let (builder, log) = hub_builder(connector);
    let hub = builder.build();
    let source = hub
        .create_data_source(new_source("warehouse", DatabaseKind::PostgreSql), &alice())
        .await
        .unwrap();
    (hub, log, source)
}
