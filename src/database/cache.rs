//! Schema Cache
//!
//! Schema documents are cached per data source with a time-to-live. The
//! durable part is a [`SchemaStore`] holding serialized documents; the
//! [`SchemaCache`] on top serializes access per data source so that an
//! invalidate can never be overtaken by a fill computed before it.

use crate::database::datasource::DataSourceId;
use crate::database::schema::{CachedSchema, SchemaDocument};
use crate::error::{QueryHubError, Result};
use crate::storage::{from_sql_timestamp, to_sql_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A serialized schema document with its validity window
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSchema {
    pub schema_data: String,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Durable key-value storage for cached schemas
#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn load(&self, id: &DataSourceId) -> Result<Option<StoredSchema>>;

    /// Drop any entry for `id` and insert `entry` in its place
    async fn replace(&self, id: &DataSourceId, entry: StoredSchema) -> Result<()>;

    async fn remove(&self, id: &DataSourceId) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Delete entries that expired at or before `now`, returning how many
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Process-local schema store
#[derive(Default)]
pub struct MemorySchemaStore {
    entries: RwLock<HashMap<DataSourceId, StoredSchema>>,
}

impl MemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> QueryHubError {
        QueryHubError::Unexpected("schema store lock poisoned".to_string())
    }
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
    async fn load(&self, id: &DataSourceId) -> Result<Option<StoredSchema>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(id).cloned())
    }

    async fn replace(&self, id: &DataSourceId, entry: StoredSchema) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.remove(id);
        entries.insert(*id, entry);
        Ok(())
    }

    async fn remove(&self, id: &DataSourceId) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.clear();
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

/// Schema store backed by the local SQLite file
pub struct SqliteSchemaStore {
    pool: SqlitePool,
}

impl SqliteSchemaStore {
    /// Create the `schema_cache` table if needed
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_cache (
                data_source_id TEXT PRIMARY KEY NOT NULL,
                schema_data TEXT NOT NULL,
                cached_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| QueryHubError::storage("Failed to create schema cache table", e))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SchemaStore for SqliteSchemaStore {
    async fn load(&self, id: &DataSourceId) -> Result<Option<StoredSchema>> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT schema_data, cached_at, expires_at FROM schema_cache WHERE data_source_id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| QueryHubError::storage("Failed to load cache", e))?;

        match row {
            Some((schema_data, cached_at, expires_at)) => Ok(Some(StoredSchema {
                schema_data,
                cached_at: from_sql_timestamp(&cached_at)?,
                expires_at: from_sql_timestamp(&expires_at)?,
            })),
            None => Ok(None),
        }
    }

    async fn replace(&self, id: &DataSourceId, entry: StoredSchema) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueryHubError::storage("Failed to save cache", e))?;

        sqlx::query("DELETE FROM schema_cache WHERE data_source_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| QueryHubError::storage("Failed to save cache", e))?;

        sqlx::query(
            "INSERT INTO schema_cache (data_source_id, schema_data, cached_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&entry.schema_data)
        .bind(to_sql_timestamp(entry.cached_at))
        .bind(to_sql_timestamp(entry.expires_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| QueryHubError::storage("Failed to save cache", e))?;

        tx.commit()
            .await
            .map_err(|e| QueryHubError::storage("Failed to save cache", e))
    }

    async fn remove(&self, id: &DataSourceId) -> Result<()> {
        sqlx::query("DELETE FROM schema_cache WHERE data_source_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| QueryHubError::storage("Failed to remove cache entry", e))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM schema_cache")
            .execute(&self.pool)
            .await
            .map_err(|e| QueryHubError::storage("Failed to clear cache", e))?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM schema_cache WHERE expires_at <= ?")
            .bind(to_sql_timestamp(now))
            .execute(&self.pool)
            .await
            .map_err(|e| QueryHubError::storage("Failed to purge cache", e))?;
        Ok(result.rows_affected())
    }
}

/// Permission to fill the cache after a miss.
///
/// Carries the key's generation at lookup time; an invalidate in between
/// makes the ticket stale and the fill is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket {
    id: DataSourceId,
    generation: u64,
}

impl FillTicket {
    pub fn data_source_id(&self) -> DataSourceId {
        self.id
    }
}

/// Result of [`SchemaCache::lookup`]
#[derive(Debug)]
pub enum CacheLookup {
    Hit(SchemaDocument),
    Miss(FillTicket),
}

/// TTL cache of schema documents keyed by data source
pub struct SchemaCache {
    store: Arc<dyn SchemaStore>,
    ttl: Duration,
    /// Per-key lock guarding that key's generation counter
    locks: StdMutex<HashMap<DataSourceId, Arc<Mutex<u64>>>>,
}

impl SchemaCache {
    pub fn new(store: Arc<dyn SchemaStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key_lock(&self, id: &DataSourceId) -> Result<Arc<Mutex<u64>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| QueryHubError::Unexpected("schema cache lock table poisoned".to_string()))?;
        Ok(Arc::clone(locks.entry(*id).or_default()))
    }

    /// The cached document, if an unexpired entry exists
    pub async fn get(&self, id: &DataSourceId) -> Result<Option<SchemaDocument>> {
        let lock = self.key_lock(id)?;
        let _guard = lock.lock().await;
        Ok(self.read_valid(id).await?.map(|cached| cached.document))
    }

    /// Like [`get`](Self::get), but a miss hands out a ticket for [`fill`](Self::fill)
    pub async fn lookup(&self, id: &DataSourceId) -> Result<CacheLookup> {
        let lock = self.key_lock(id)?;
        let generation = lock.lock().await;
        match self.read_valid(id).await? {
            Some(cached) => {
                debug!(data_source = %id, "schema cache hit");
                Ok(CacheLookup::Hit(cached.document))
            }
            None => {
                debug!(data_source = %id, "schema cache miss");
                Ok(CacheLookup::Miss(FillTicket {
                    id: *id,
                    generation: *generation,
                }))
            }
        }
    }

    /// Store a document discovered after a miss. Returns false when the key
    /// was invalidated since the ticket was issued.
    pub async fn fill(&self, ticket: FillTicket, document: &SchemaDocument) -> Result<bool> {
        let lock = self.key_lock(&ticket.id)?;
        let generation = lock.lock().await;
        if *generation != ticket.generation {
            debug!(data_source = %ticket.id, "discarding schema fill invalidated in flight");
            return Ok(false);
        }
        self.write(&ticket.id, document, self.ttl).await?;
        Ok(true)
    }

    /// Unconditionally replace the entry using the configured TTL
    pub async fn put(&self, id: &DataSourceId, document: &SchemaDocument) -> Result<()> {
        self.put_with_ttl(id, document, self.ttl).await
    }

    pub async fn put_with_ttl(&self, id: &DataSourceId, document: &SchemaDocument, ttl: Duration) -> Result<()> {
        let lock = self.key_lock(id)?;
        let _guard = lock.lock().await;
        self.write(id, document, ttl).await
    }

    /// Delete the entry and make every outstanding ticket for it stale
    pub async fn invalidate(&self, id: &DataSourceId) -> Result<()> {
        let lock = self.key_lock(id)?;
        let mut generation = lock.lock().await;
        *generation += 1;
        self.store.remove(id).await?;
        info!(data_source = %id, "schema cache invalidated");
        Ok(())
    }

    /// Invalidate every entry
    pub async fn clear(&self) -> Result<()> {
        let locks: Vec<(DataSourceId, Arc<Mutex<u64>>)> = {
            let locks = self
                .locks
                .lock()
                .map_err(|_| QueryHubError::Unexpected("schema cache lock table poisoned".to_string()))?;
            locks.iter().map(|(id, lock)| (*id, Arc::clone(lock))).collect()
        };

        for (id, lock) in locks {
            let mut generation = lock.lock().await;
            *generation += 1;
            self.store.remove(&id).await?;
        }
        self.store.clear().await?;
        info!("schema cache cleared");
        Ok(())
    }

    /// Drop expired entries from the store
    pub async fn purge_expired(&self) -> Result<u64> {
        let purged = self.store.purge_expired(Utc::now()).await?;
        if purged > 0 {
            debug!(purged, "purged expired schema cache entries");
        }
        Ok(purged)
    }

    /// Caller holds the key lock
    async fn read_valid(&self, id: &DataSourceId) -> Result<Option<CachedSchema>> {
        let Some(stored) = self.store.load(id).await? else {
            return Ok(None);
        };

        if stored.expires_at <= Utc::now() {
            self.store.remove(id).await?;
            return Ok(None);
        }

        match serde_json::from_str::<SchemaDocument>(&stored.schema_data) {
            Ok(document) => Ok(Some(CachedSchema {
                document,
                cached_at: stored.cached_at,
                expires_at: stored.expires_at,
            })),
            Err(e) => {
                warn!(data_source = %id, error = %e, "discarding unreadable cached schema");
                self.store.remove(id).await?;
                Ok(None)
            }
        }
    }

    /// Caller holds the key lock
    async fn write(&self, id: &DataSourceId, document: &SchemaDocument, ttl: Duration) -> Result<()> {
        let schema_data = match serde_json::to_string(document) {
            Ok(json) => json,
            Err(e) => {
                self.store.remove(id).await?;
                return Err(QueryHubError::Serialization(e));
            }
        };

        let cached_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| QueryHubError::Config(format!("schema cache ttl out of range: {}", e)))?;

        self.store
            .replace(
                id,
                StoredSchema {
                    schema_data,
                    cached_at,
                    expires_at: cached_at + ttl,
                },
            )
            .await?;
        debug!(data_source = %id, "schema cached");
        Ok(())
    }
}
