//! Query Hub
//!
//! The facade exposed to callers. It owns the data source registry and wires
//! the prober, introspector, schema cache and executor together. Every
//! operation is scoped to a principal: data sources owned by someone else, or
//! logically deleted, behave as if they did not exist.

use crate::config::EngineConfig;
use crate::database::cache::{CacheLookup, MemorySchemaStore, SchemaCache, SchemaStore};
use crate::database::connection::{Connector, DriverConnector};
use crate::database::datasource::{
    ConnectTarget, ConnectionStatus, CredentialStore, DataSourceConnection, DataSourceId, DataSourceStore,
    DataSourceUpdate, EnvironmentCredentials, InMemoryDataSourceStore, NewDataSource, Principal,
};
use crate::database::introspector::SchemaIntrospector;
use crate::database::prober::ConnectionProber;
use crate::database::schema::SchemaDocument;
use crate::error::{QueryHubError, Result};
use crate::query::executor::{ExecutionPlan, QueryExecutor};
use crate::query::history::{ExecutionLog, ExecutionRecord, MemoryExecutionLog};
use crate::query::result::{ProbeOutcome, QueryResponse};
use crate::query::saved::{extract_sql, SavedQuerySource, SqlGenerator};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Longest statement timeout a caller may ask for (one day)
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Caller-facing execution request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryRequest {
    pub data_source_id: DataSourceId,
    pub sql: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Defaults to the engine's row limit
    pub limit: Option<u64>,
    /// Defaults to the engine's statement timeout
    pub timeout_secs: Option<u64>,
}

impl QueryRequest {
    pub fn new(data_source_id: DataSourceId, sql: impl Into<String>) -> Self {
        Self {
            data_source_id,
            sql: sql.into(),
            ..Default::default()
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// Builder for [`QueryHub`]
pub struct QueryHubBuilder {
    engine: EngineConfig,
    connector: Arc<dyn Connector>,
    data_sources: Arc<dyn DataSourceStore>,
    credentials: Arc<dyn CredentialStore>,
    schema_store: Arc<dyn SchemaStore>,
    execution_log: Arc<dyn ExecutionLog>,
    saved_queries: Option<Arc<dyn SavedQuerySource>>,
    sql_generator: Option<Arc<dyn SqlGenerator>>,
}

impl QueryHubBuilder {
    /// Real drivers, in-memory stores and environment credentials
    pub fn new(engine: EngineConfig) -> Self {
        Self {
            engine,
            connector: Arc::new(DriverConnector),
            data_sources: Arc::new(InMemoryDataSourceStore::new()),
            credentials: Arc::new(EnvironmentCredentials),
            schema_store: Arc::new(MemorySchemaStore::new()),
            execution_log: Arc::new(MemoryExecutionLog::new()),
            saved_queries: None,
            sql_generator: None,
        }
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn data_sources(mut self, store: Arc<dyn DataSourceStore>) -> Self {
        self.data_sources = store;
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn schema_store(mut self, store: Arc<dyn SchemaStore>) -> Self {
        self.schema_store = store;
        self
    }

    pub fn execution_log(mut self, log: Arc<dyn ExecutionLog>) -> Self {
        self.execution_log = log;
        self
    }

    pub fn saved_queries(mut self, source: Arc<dyn SavedQuerySource>) -> Self {
        self.saved_queries = Some(source);
        self
    }

    pub fn sql_generator(mut self, generator: Arc<dyn SqlGenerator>) -> Self {
        self.sql_generator = Some(generator);
        self
    }

    pub fn build(self) -> QueryHub {
        let connect_timeout = self.engine.connect_timeout();
        QueryHub {
            prober: ConnectionProber::new(Arc::clone(&self.connector), self.engine.probe_timeout()),
            introspector: SchemaIntrospector::new(Arc::clone(&self.connector), connect_timeout),
            executor: QueryExecutor::new(
                Arc::clone(&self.connector),
                Arc::clone(&self.credentials),
                Arc::clone(&self.execution_log),
                connect_timeout,
            ),
            cache: SchemaCache::new(self.schema_store, self.engine.schema_cache_ttl()),
            engine: self.engine,
            data_sources: self.data_sources,
            credentials: self.credentials,
            execution_log: self.execution_log,
            saved_queries: self.saved_queries,
            sql_generator: self.sql_generator,
        }
    }
}

pub struct QueryHub {
    engine: EngineConfig,
    data_sources: Arc<dyn DataSourceStore>,
    credentials: Arc<dyn CredentialStore>,
    execution_log: Arc<dyn ExecutionLog>,
    saved_queries: Option<Arc<dyn SavedQuerySource>>,
    sql_generator: Option<Arc<dyn SqlGenerator>>,
    cache: SchemaCache,
    prober: ConnectionProber,
    introspector: SchemaIntrospector,
    executor: QueryExecutor,
}

impl QueryHub {
    pub fn builder(engine: EngineConfig) -> QueryHubBuilder {
        QueryHubBuilder::new(engine)
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.cache
    }

    // Data source registry

    pub async fn create_data_source(&self, request: NewDataSource, principal: &Principal) -> Result<DataSourceConnection> {
        self.ensure_unique_name(&request.name, None, principal).await?;
        let source = request.into_connection(DataSourceId::new(), principal.clone())?;
        self.data_sources.save(source.clone()).await?;
        info!(data_source = %source.id, name = %source.name, kind = %source.kind, "data source created");
        Ok(source.redacted())
    }

    /// Register a data source that already carries its identity, replacing
    /// any previous definition with the same id.
    pub async fn register_data_source(&self, source: DataSourceConnection) -> Result<()> {
        let id = source.id;
        let changed = match self.data_sources.get(&id).await? {
            Some(existing) => !same_connection(&existing, &source),
            None => false,
        };
        self.data_sources.save(source).await?;
        if changed {
            self.cache.invalidate(&id).await?;
        }
        Ok(())
    }

    /// Apply a partial update; the cached schema is always invalidated
    pub async fn update_data_source(
        &self,
        id: &DataSourceId,
        update: DataSourceUpdate,
        principal: &Principal,
    ) -> Result<DataSourceConnection> {
        let mut source = self.resolve(id, principal).await?;
        if let Some(name) = update.name.as_deref() {
            self.ensure_unique_name(name, Some(id), principal).await?;
        }
        update.apply(&mut source);
        self.data_sources.save(source.clone()).await?;
        self.cache.invalidate(id).await?;
        info!(data_source = %id, "data source updated");
        Ok(source.redacted())
    }

    /// Logical delete; execution history referencing it is kept
    pub async fn delete_data_source(&self, id: &DataSourceId, principal: &Principal) -> Result<()> {
        let mut source = self.resolve(id, principal).await?;
        source.deleted = true;
        source.updated_at = Utc::now();
        self.data_sources.save(source).await?;
        self.cache.invalidate(id).await?;
        info!(data_source = %id, "data source deleted");
        Ok(())
    }

    pub async fn get_data_source(&self, id: &DataSourceId, principal: &Principal) -> Result<DataSourceConnection> {
        Ok(self.resolve(id, principal).await?.redacted())
    }

    pub async fn list_data_sources(&self, principal: &Principal) -> Result<Vec<DataSourceConnection>> {
        Ok(self
            .data_sources
            .list(principal)
            .await?
            .into_iter()
            .map(DataSourceConnection::redacted)
            .collect())
    }

    /// Look a data source up by name or id string
    pub async fn find_data_source(&self, name_or_id: &str, principal: &Principal) -> Result<DataSourceConnection> {
        if let Ok(id) = name_or_id.parse::<DataSourceId>() {
            return self.get_data_source(&id, principal).await;
        }
        self.list_data_sources(principal)
            .await?
            .into_iter()
            .find(|s| s.name == name_or_id)
            .ok_or_else(|| QueryHubError::NotFound(format!("DataSource with name {}", name_or_id)))
    }

    // Probing

    /// Probe reachability and record the outcome on the data source
    pub async fn probe_connection(&self, id: &DataSourceId, principal: &Principal) -> Result<ProbeOutcome> {
        let source = self.resolve(id, principal).await?;

        let outcome = match self.credentials.credentials(&source, principal).await {
            Ok(credentials) => self.prober.probe(&ConnectTarget::new(&source, credentials)).await,
            Err(e) => {
                warn!(data_source = %id, error = %e, "probe skipped, credentials unavailable");
                ProbeOutcome {
                    success: false,
                    message: format!("credentials unavailable: {}", e),
                    elapsed_ms: 0,
                }
            }
        };

        // The source may have been edited while the probe ran; only the
        // health fields are written back.
        let status = if outcome.success {
            ConnectionStatus::Active
        } else {
            ConnectionStatus::Error
        };
        if !self.data_sources.record_probe(id, status, Utc::now()).await? {
            warn!(data_source = %id, "data source vanished during probe");
        }

        Ok(outcome)
    }

    // Schema

    /// Cached schema, discovering it on a miss
    pub async fn get_schema(&self, id: &DataSourceId, principal: &Principal) -> Result<SchemaDocument> {
        let source = self.resolve(id, principal).await?;

        let ticket = match self.cache.lookup(id).await? {
            CacheLookup::Hit(document) => return Ok(document),
            CacheLookup::Miss(ticket) => ticket,
        };

        let target = self.target(&source, principal).await?;
        let document = self.introspector.discover(&target).await?;

        match self.cache.fill(ticket, &document).await {
            Ok(true) => {}
            Ok(false) => info!(data_source = %id, "discovered schema not cached, data source changed meanwhile"),
            Err(e) => warn!(data_source = %id, error = %e, "failed to cache discovered schema"),
        }
        Ok(document)
    }

    pub async fn clear_schema_cache(&self, id: &DataSourceId, principal: &Principal) -> Result<()> {
        self.resolve(id, principal).await?;
        self.cache.invalidate(id).await
    }

    /// Drop expired schema cache entries
    pub async fn purge_expired_schemas(&self) -> Result<u64> {
        self.cache.purge_expired().await
    }

    // Execution

    pub async fn execute_query(&self, request: QueryRequest, principal: &Principal) -> Result<QueryResponse> {
        let source = self.resolve(&request.data_source_id, principal).await?;
        let plan = ExecutionPlan {
            sql: request.sql,
            parameters: request.parameters,
            limit: Some(request.limit.unwrap_or(self.engine.default_row_limit)),
            timeout: self.statement_timeout(request.timeout_secs)?,
        };
        self.executor.execute(&source, principal, &plan).await
    }

    /// Requested timeout, bounded to what every server accepts. Zero would
    /// disable the server-side timeout and is rejected.
    fn statement_timeout(&self, timeout_secs: Option<u64>) -> Result<Duration> {
        match timeout_secs {
            None => Ok(self.engine.default_timeout()),
            Some(0) => Err(QueryHubError::InvalidInput(
                "timeout must be at least one second".to_string(),
            )),
            Some(secs) => Ok(Duration::from_secs(secs.min(MAX_TIMEOUT_SECS))),
        }
    }

    /// Run a saved query with the default limit and timeout, then link the
    /// execution record to it. `parameters` override the stored values of
    /// the same name.
    pub async fn execute_saved_query(
        &self,
        saved_query_id: Uuid,
        parameters: Map<String, Value>,
        principal: &Principal,
    ) -> Result<QueryResponse> {
        let saved = self
            .saved_queries
            .as_ref()
            .ok_or_else(|| QueryHubError::Config("no saved query source configured".to_string()))?
            .saved_query(saved_query_id, principal)
            .await?
            .ok_or_else(|| QueryHubError::not_found("SavedQuery", saved_query_id))?;

        let mut merged = saved.parameters;
        merged.extend(parameters);
        let request = QueryRequest::new(saved.data_source_id, saved.sql_text).with_parameters(merged);
        let response = self.execute_query(request, principal).await?;
        self.execution_log
            .link_saved_query(response.execution_id, saved.id)
            .await?;
        Ok(response)
    }

    /// Generate SQL from a natural-language request and run it
    pub async fn execute_natural_language(
        &self,
        id: &DataSourceId,
        request: &str,
        principal: &Principal,
    ) -> Result<QueryResponse> {
        let generator = self
            .sql_generator
            .as_ref()
            .ok_or_else(|| QueryHubError::Config("no SQL generator configured".to_string()))?;

        let schema = self.get_schema(id, principal).await?;
        let sql = extract_sql(&generator.generate(request, &schema).await?);
        if sql.is_empty() {
            return Err(QueryHubError::InvalidInput("generator returned no SQL".to_string()));
        }
        info!(data_source = %id, "running generated SQL");
        self.execute_query(QueryRequest::new(*id, sql), principal).await
    }

    // History

    pub async fn execution(&self, execution_id: Uuid, principal: &Principal) -> Result<ExecutionRecord> {
        self.execution_log
            .get(execution_id)
            .await?
            .filter(|record| &record.owner == principal)
            .ok_or_else(|| QueryHubError::not_found("QueryExecution", execution_id))
    }

    pub async fn recent_executions(&self, principal: &Principal, limit: usize) -> Result<Vec<ExecutionRecord>> {
        self.execution_log.recent(principal, limit).await
    }

    async fn resolve(&self, id: &DataSourceId, principal: &Principal) -> Result<DataSourceConnection> {
        self.data_sources
            .get(id)
            .await?
            .filter(|source| source.is_visible_to(principal))
            .ok_or_else(|| QueryHubError::not_found("DataSource", id))
    }

    async fn target(&self, source: &DataSourceConnection, principal: &Principal) -> Result<ConnectTarget> {
        let credentials = self
            .credentials
            .credentials(source, principal)
            .await
            .map_err(|e| QueryHubError::Connectivity(format!("credentials unavailable: {}", e)))?;
        Ok(ConnectTarget::new(source, credentials))
    }

    async fn ensure_unique_name(&self, name: &str, except: Option<&DataSourceId>, principal: &Principal) -> Result<()> {
        let taken = self
            .data_sources
            .list(principal)
            .await?
            .iter()
            .any(|s| s.name == name && Some(&s.id) != except);
        if taken {
            return Err(QueryHubError::InvalidInput(format!(
                "a data source named '{}' already exists",
                name
            )));
        }
        Ok(())
    }
}

fn same_connection(a: &DataSourceConnection, b: &DataSourceConnection) -> bool {
    a.kind == b.kind
        && a.host == b.host
        && a.port == b.port
        && a.database == b.database
        && a.username == b.username
        && a.secret == b.secret
        && a.tls == b.tls
        && a.params == b.params
}
