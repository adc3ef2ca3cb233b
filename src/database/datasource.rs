//! Data sources
//!
//! A data source is a stored set of connection details for one target
//! database. The secret it carries is opaque here: turning it into a usable
//! password is the [`CredentialStore`]'s job.

use crate::database::dialect::{self, DatabaseKind};
use crate::error::{QueryHubError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::RwLock;
use uuid::Uuid;

/// Opaque data source identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSourceId(pub Uuid);

impl DataSourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DataSourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DataSourceId {
    type Err = QueryHubError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(DataSourceId)
            .map_err(|e| QueryHubError::InvalidInput(format!("invalid data source id '{}': {}", s, e)))
    }
}

/// The identity a caller acts as
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(pub String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last known health of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    /// Connection is working
    Active,
    /// Disabled by its owner
    Inactive,
    /// Last probe failed
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionStatus::Active => "ACTIVE",
            ConnectionStatus::Inactive => "INACTIVE",
            ConnectionStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

/// Stored connection details for one target database
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConnection {
    pub id: DataSourceId,
    pub owner: Principal,
    pub name: String,
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Opaque secret, only meaningful to the credential store
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub tls: bool,
    /// Free-form driver parameters
    pub params: BTreeMap<String, String>,
    pub status: ConnectionStatus,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSourceConnection {
    /// Credential-free connection string for this data source
    pub fn connection_string(&self) -> String {
        credential_free_url(self.kind, &self.host, self.port, &self.database, self.tls, &self.params)
    }

    pub fn is_visible_to(&self, principal: &Principal) -> bool {
        !self.deleted && &self.owner == principal
    }

    /// Copy suitable for handing back to callers
    pub fn redacted(mut self) -> Self {
        self.secret.clear();
        self
    }
}

impl fmt::Debug for DataSourceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceConnection")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("secret", &"***")
            .field("tls", &self.tls)
            .field("params", &self.params)
            .field("status", &self.status)
            .field("last_tested_at", &self.last_tested_at)
            .field("deleted", &self.deleted)
            .finish()
    }
}

/// Request to register a new data source
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDataSource {
    pub name: String,
    pub kind: Option<DatabaseKind>,
    pub host: String,
    /// Vendor default port when omitted
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    pub secret: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl NewDataSource {
    /// Validate the request and turn it into a stored data source
    pub fn into_connection(self, id: DataSourceId, owner: Principal) -> Result<DataSourceConnection> {
        let kind = self
            .kind
            .ok_or_else(|| QueryHubError::InvalidInput("database type is required".to_string()))?;
        for (field, value) in [
            ("name", &self.name),
            ("host", &self.host),
            ("database", &self.database),
            ("username", &self.username),
            ("secret", &self.secret),
        ] {
            if value.trim().is_empty() {
                return Err(QueryHubError::InvalidInput(format!("{} is required", field)));
            }
        }

        let now = Utc::now();
        Ok(DataSourceConnection {
            id,
            owner,
            name: self.name,
            kind,
            host: self.host,
            port: self.port.unwrap_or_else(|| kind.default_port()),
            database: self.database,
            username: self.username,
            secret: self.secret,
            tls: self.tls,
            params: self.params,
            status: ConnectionStatus::Active,
            last_tested_at: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update of a data source; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct DataSourceUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub secret: Option<String>,
    pub tls: Option<bool>,
    pub params: Option<BTreeMap<String, String>>,
}

impl DataSourceUpdate {
    pub fn apply(self, target: &mut DataSourceConnection) {
        if let Some(name) = self.name {
            target.name = name;
        }
        if let Some(host) = self.host {
            target.host = host;
        }
        if let Some(port) = self.port {
            target.port = port;
        }
        if let Some(database) = self.database {
            target.database = database;
        }
        if let Some(username) = self.username {
            target.username = username;
        }
        if let Some(secret) = self.secret {
            target.secret = secret;
        }
        if let Some(tls) = self.tls {
            target.tls = tls;
        }
        if let Some(params) = self.params {
            target.params = params;
        }
        target.updated_at = Utc::now();
    }
}

/// Decrypted username/password pair
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Everything a driver needs to open one connection
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub data_source_id: DataSourceId,
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub tls: bool,
    pub params: BTreeMap<String, String>,
    pub credentials: Credentials,
}

impl ConnectTarget {
    pub fn new(source: &DataSourceConnection, credentials: Credentials) -> Self {
        Self {
            data_source_id: source.id,
            kind: source.kind,
            host: source.host.clone(),
            port: source.port,
            database: source.database.clone(),
            tls: source.tls,
            params: source.params.clone(),
            credentials,
        }
    }

    /// Credential-free connection string, safe to log
    pub fn connection_string(&self) -> String {
        credential_free_url(self.kind, &self.host, self.port, &self.database, self.tls, &self.params)
    }
}

fn credential_free_url(
    kind: DatabaseKind,
    host: &str,
    port: u16,
    database: &str,
    tls: bool,
    params: &BTreeMap<String, String>,
) -> String {
    dialect::append_params(kind, &dialect::connection_string(kind, host, port, database, tls), params)
}

/// Persistence of data source definitions
#[async_trait]
pub trait DataSourceStore: Send + Sync {
    /// Fetch by id, including logically deleted entries
    async fn get(&self, id: &DataSourceId) -> Result<Option<DataSourceConnection>>;

    /// Insert or overwrite
    async fn save(&self, source: DataSourceConnection) -> Result<()>;

    /// Non-deleted sources owned by `owner`
    async fn list(&self, owner: &Principal) -> Result<Vec<DataSourceConnection>>;

    /// Update only the health fields of a stored source, leaving its
    /// connection settings as they currently are. Returns `false` when the
    /// source no longer exists.
    async fn record_probe(&self, id: &DataSourceId, status: ConnectionStatus, tested_at: DateTime<Utc>) -> Result<bool>;
}

/// Process-local data source store
#[derive(Default)]
pub struct InMemoryDataSourceStore {
    sources: RwLock<HashMap<DataSourceId, DataSourceConnection>>,
}

impl InMemoryDataSourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: impl IntoIterator<Item = DataSourceConnection>) -> Self {
        let map = sources.into_iter().map(|s| (s.id, s)).collect();
        Self {
            sources: RwLock::new(map),
        }
    }

    fn poisoned() -> QueryHubError {
        QueryHubError::Unexpected("data source store lock poisoned".to_string())
    }
}

#[async_trait]
impl DataSourceStore for InMemoryDataSourceStore {
    async fn get(&self, id: &DataSourceId) -> Result<Option<DataSourceConnection>> {
        let guard = self.sources.read().map_err(|_| Self::poisoned())?;
        Ok(guard.get(id).cloned())
    }

    async fn save(&self, source: DataSourceConnection) -> Result<()> {
        let mut guard = self.sources.write().map_err(|_| Self::poisoned())?;
        guard.insert(source.id, source);
        Ok(())
    }

    async fn list(&self, owner: &Principal) -> Result<Vec<DataSourceConnection>> {
        let guard = self.sources.read().map_err(|_| Self::poisoned())?;
        let mut sources: Vec<_> = guard
            .values()
            .filter(|s| s.is_visible_to(owner))
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }

    async fn record_probe(&self, id: &DataSourceId, status: ConnectionStatus, tested_at: DateTime<Utc>) -> Result<bool> {
        let mut guard = self.sources.write().map_err(|_| Self::poisoned())?;
        match guard.get_mut(id) {
            Some(source) => {
                source.status = status;
                source.last_tested_at = Some(tested_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Turns a data source's opaque secret into usable credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credentials(&self, source: &DataSourceConnection, principal: &Principal) -> Result<Credentials>;
}

/// Resolves `env:VAR` secrets from the process environment; any other secret
/// is used as-is.
#[derive(Debug, Default, Clone)]
pub struct EnvironmentCredentials;

#[async_trait]
impl CredentialStore for EnvironmentCredentials {
    async fn credentials(&self, source: &DataSourceConnection, principal: &Principal) -> Result<Credentials> {
        if !source.is_visible_to(principal) {
            return Err(QueryHubError::not_found("DataSource", source.id));
        }
        let password = match source.secret.strip_prefix("env:") {
            Some(var) => std::env::var(var).map_err(|_| {
                QueryHubError::Config(format!(
                    "environment variable {} referenced by data source '{}' is not set",
                    var, source.name
                ))
            })?,
            None => source.secret.clone(),
        };
        Ok(Credentials {
            username: source.username.clone(),
            password,
        })
    }
}
