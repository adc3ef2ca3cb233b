//! External collaborators of the executor
//!
//! Saved-query persistence and natural-language SQL generation live outside
//! this crate; these traits are the narrow seams they plug into.

use crate::database::datasource::{DataSourceId, Principal};
use crate::database::schema::SchemaDocument;
use crate::error::{QueryHubError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// A stored query definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedQuery {
    pub id: Uuid,
    pub owner: Principal,
    pub name: String,
    pub data_source_id: DataSourceId,
    pub sql_text: String,
    /// Parameter values applied when the query runs
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Resolves saved queries visible to a principal
#[async_trait]
pub trait SavedQuerySource: Send + Sync {
    async fn saved_query(&self, id: Uuid, principal: &Principal) -> Result<Option<SavedQuery>>;
}

/// Process-local saved query source
#[derive(Default)]
pub struct InMemorySavedQueries {
    queries: RwLock<HashMap<Uuid, SavedQuery>>,
}

impl InMemorySavedQueries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, query: SavedQuery) -> Result<()> {
        self.queries
            .write()
            .map_err(|_| QueryHubError::Unexpected("saved query lock poisoned".to_string()))?
            .insert(query.id, query);
        Ok(())
    }
}

#[async_trait]
impl SavedQuerySource for InMemorySavedQueries {
    async fn saved_query(&self, id: Uuid, principal: &Principal) -> Result<Option<SavedQuery>> {
        let queries = self
            .queries
            .read()
            .map_err(|_| QueryHubError::Unexpected("saved query lock poisoned".to_string()))?;
        Ok(queries.get(&id).filter(|q| &q.owner == principal).cloned())
    }
}

/// Turns a natural-language request into SQL for a given schema
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, request: &str, schema: &SchemaDocument) -> Result<String>;
}

/// Pull the statement out of generator output that may wrap it in a fenced
/// code block.
pub fn extract_sql(generated: &str) -> String {
    let trimmed = generated.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    let body = &trimmed[start + 3..];
    let body = body.strip_prefix("sql").or_else(|| body.strip_prefix("SQL")).unwrap_or(body);
    let body = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}
