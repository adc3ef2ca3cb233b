//! Database module
//!
//! This module provides the vendor dialect table, data source model,
//! connection sessions, schema discovery, probing and the schema cache.

pub mod cache;
pub mod connection;
pub mod datasource;
pub mod dialect;
pub mod drivers;
pub mod introspector;
pub mod prober;
pub mod schema;

// Re-exports
pub use cache::{CacheLookup, MemorySchemaStore, SchemaCache, SchemaStore, SqliteSchemaStore};
pub use connection::{Connector, DriverConnector, SqlSession, TableEntry};
pub use datasource::{
    ConnectTarget, ConnectionStatus, CredentialStore, Credentials, DataSourceConnection, DataSourceId,
    DataSourceStore, DataSourceUpdate, EnvironmentCredentials, InMemoryDataSourceStore, NewDataSource, Principal,
};
pub use dialect::{DatabaseKind, LimitStyle};
pub use introspector::SchemaIntrospector;
pub use prober::ConnectionProber;
pub use schema::{CachedSchema, ColumnDescriptor, ForeignKeyDescriptor, SchemaDocument, TableDescriptor};
