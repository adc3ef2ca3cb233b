//! Configuration module
//!
//! This module handles configuration loading and assembles the application
//! state the CLI runs against.

pub mod storage;

pub use storage::{Config, DataSourceConfig, EngineConfig, StorageConfig};

use crate::database::cache::SqliteSchemaStore;
use crate::database::datasource::{DataSourceConnection, Principal};
use crate::error::Result;
use crate::hub::QueryHub;
use crate::query::history::SqliteExecutionLog;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Application state
pub struct AppState {
    /// The hub every command runs against
    pub hub: Arc<QueryHub>,
    /// Identity of the local user
    pub principal: Principal,
    /// Data source bare SQL runs against
    pub current_source: Option<DataSourceConnection>,
}

impl AppState {
    pub fn new(hub: Arc<QueryHub>, principal: Principal) -> Self {
        Self {
            hub,
            principal,
            current_source: None,
        }
    }

    /// Open local storage, register the configured data sources and select
    /// the first one.
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let path = config.storage_path()?;
        let pool = crate::storage::open_pool(&path).await?;
        info!(path = %path.display(), "local storage opened");

        let hub = QueryHub::builder(config.engine.clone())
            .schema_store(Arc::new(SqliteSchemaStore::new(pool.clone()).await?))
            .execution_log(Arc::new(SqliteExecutionLog::new(pool).await?))
            .build();

        let principal = config.principal();
        let mut first = None;
        for declared in config.data_sources {
            let source = declared.into_connection(&principal)?;
            info!(data_source = %source.id, name = %source.name, kind = %source.kind, "data source registered");
            if first.is_none() {
                first = Some(source.clone().redacted());
            }
            hub.register_data_source(source).await?;
        }

        let mut state = Self::new(Arc::new(hub), principal);
        state.current_source = first;
        Ok(state)
    }

    /// Set the current data source
    pub fn set_current_source(&mut self, source: DataSourceConnection) {
        self.current_source = Some(source);
    }

    /// Name of the current data source, if any
    pub fn current_source_name(&self) -> Option<&str> {
        self.current_source.as_ref().map(|s| s.name.as_str())
    }
}

/// Shared application state
pub type SharedState = Arc<RwLock<AppState>>;

pub fn create_shared_state(state: AppState) -> SharedState {
    Arc::new(RwLock::new(state))
}
