//! Configuration Storage
//!
//! This module loads the TOML configuration file: engine tunables, the local
//! storage location, the acting principal and the configured data sources.

use crate::database::datasource::{DataSourceConnection, DataSourceId, NewDataSource, Principal};
use crate::database::dialect::DatabaseKind;
use crate::error::{QueryHubError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the configuration file location
pub const CONFIG_ENV: &str = "QUERY_HUB_CONFIG";

/// Engine tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub probe_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub schema_cache_ttl_secs: u64,
    pub default_row_limit: u64,
    pub default_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 10,
            connect_timeout_secs: 10,
            schema_cache_ttl_secs: 3600,
            default_row_limit: 1000,
            default_timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn schema_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_cache_ttl_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Where the local SQLite file lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Defaults to `~/.query-hub/hub.db`
    pub path: Option<PathBuf>,
}

/// A data source declared in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Derived from the principal and name when omitted
    pub id: Option<Uuid>,
    pub name: String,
    /// Any alias accepted by [`DatabaseKind`]'s parser
    pub kind: String,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    /// `env:VAR` reference or the secret itself
    pub secret: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl DataSourceConfig {
    /// Turn the declaration into a stored data source owned by `owner`
    pub fn into_connection(self, owner: &Principal) -> Result<DataSourceConnection> {
        let id = self
            .id
            .unwrap_or_else(|| Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{}/{}", owner, self.name).as_bytes()));
        let kind: DatabaseKind = self.kind.parse()?;

        NewDataSource {
            name: self.name,
            kind: Some(kind),
            host: self.host,
            port: self.port,
            database: self.database,
            username: self.username,
            secret: self.secret,
            tls: self.tls,
            params: self.params,
        }
        .into_connection(DataSourceId(id), owner.clone())
    }
}

/// Persistent configuration data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity the local CLI acts as
    pub principal: String,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub data_sources: Vec<DataSourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            principal: "local".to_string(),
            engine: EngineConfig::default(),
            storage: StorageConfig::default(),
            data_sources: Vec::new(),
        }
    }
}

impl Config {
    /// Get the configuration directory path
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("query-hub"))
            .ok_or_else(|| QueryHubError::Config("Could not find configuration directory".to_string()))
    }

    /// Get the configuration file path, honouring `QUERY_HUB_CONFIG`
    pub fn config_file() -> Result<PathBuf> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::config_dir()?.join(CONFIG_FILE)),
        }
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Load configuration from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| QueryHubError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| QueryHubError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn principal(&self) -> Principal {
        Principal::new(self.principal.clone())
    }

    /// Resolved SQLite location
    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => crate::storage::default_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        principal = "alice"

        [engine]
        schema_cache_ttl_secs = 60

        [storage]
        path = "/tmp/hub.db"

        [[data_sources]]
        name = "warehouse"
        kind = "postgres"
        host = "pg.internal"
        database = "dw"
        username = "reporter"
        secret = "env:WAREHOUSE_PASSWORD"
        tls = true

        [data_sources.params]
        application_name = "query-hub"
    "#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.principal, "local");
        assert_eq!(config.engine.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.engine.schema_cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.engine.default_row_limit, 1000);
        assert_eq!(config.engine.default_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.principal(), Principal::new("alice"));
        assert_eq!(config.engine.schema_cache_ttl_secs, 60);
        assert_eq!(config.engine.connect_timeout_secs, 10);
        assert_eq!(config.storage_path().unwrap(), PathBuf::from("/tmp/hub.db"));
        assert_eq!(config.data_sources.len(), 1);
        assert_eq!(config.data_sources[0].params["application_name"], "query-hub");
    }

    #[test]
    fn test_data_source_ids_are_stable() {
        let config = Config::parse(SAMPLE).unwrap();
        let owner = config.principal();
        let first = config.data_sources[0].clone().into_connection(&owner).unwrap();
        let second = config.data_sources[0].clone().into_connection(&owner).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.kind, DatabaseKind::PostgreSql);
        assert_eq!(first.port, 5432);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut source = Config::parse(SAMPLE).unwrap().data_sources.remove(0);
        source.kind = "db2".to_string();
        assert!(source.into_connection(&Principal::new("alice")).is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }
}
