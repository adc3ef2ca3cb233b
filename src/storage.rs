//! Local SQLite storage
//!
//! The schema cache and the execution history share one SQLite file. Each
//! store creates its own table on construction.

use crate::error::{QueryHubError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};

/// Open (creating when missing) the SQLite file at `path`
pub async fn open_pool(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| QueryHubError::storage(&format!("failed to open {}", path.display()), e))
}

/// `~/.query-hub/hub.db`
pub fn default_path() -> Result<PathBuf> {
    let mut path = dirs::home_dir()
        .ok_or_else(|| QueryHubError::Config("Could not determine home directory".to_string()))?;
    path.push(".query-hub");
    path.push("hub.db");
    Ok(path)
}

/// Fixed-width UTC timestamps so that text comparison orders them
pub(crate) fn to_sql_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_sql_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| QueryHubError::Storage(format!("invalid timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_path() {
        let path = default_path().unwrap();
        assert!(path.to_string_lossy().contains(".query-hub"));
        assert!(path.ends_with("hub.db"));
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(5);
        assert!(to_sql_timestamp(earlier) < to_sql_timestamp(later));
        assert_eq!(from_sql_timestamp(&to_sql_timestamp(earlier)).unwrap().timestamp_micros(), earlier.timestamp_micros());
    }

    #[tokio::test]
    async fn test_open_pool_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hub.db");
        let pool = open_pool(&path).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
        assert!(path.exists());
    }
}
