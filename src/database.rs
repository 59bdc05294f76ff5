//! Embedded SQLite database
//!
//! Owns the connection pool and runs the embedded migrations that create
//! the allocation, settings, and service-instance tables. The repository
//! implementations in [`crate::storage`] share one [`Database`] handle.

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};

use crate::repository::{RepositoryError, RepositoryResult};

/// Static migrator for the embedded migrations directory
static MIGRATOR: Migrator = sqlx::migrate!();

/// Connection settings for the embedded database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    path: PathBuf,
    max_connections: u32,
}

impl DatabaseConfig {
    /// Configuration for an on-disk database file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 5,
        }
    }

    /// Overrides the connection pool size
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// The database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Shared handle over the SQLite pool; cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database file and runs migrations.
    pub async fn connect(config: DatabaseConfig) -> RepositoryResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(config.path())
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| RepositoryError::Backend {
                message: format!("failed to open database at {}", config.path().display()),
                source: Some(Box::new(e)),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| RepositoryError::Backend {
                message: "failed to run database migrations".to_string(),
                source: Some(Box::new(e)),
            })?;

        tracing::info!(path = %config.path().display(), "database ready");
        Ok(Self { pool })
    }

    /// An in-memory database for tests. A single connection keeps every
    /// statement on the same in-memory instance.
    pub async fn in_memory() -> RepositoryResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| RepositoryError::Backend {
                message: "failed to open in-memory database".to_string(),
                source: Some(Box::new(e)),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| RepositoryError::Backend {
                message: "failed to run database migrations".to_string(),
                source: Some(Box::new(e)),
            })?;

        Ok(Self { pool })
    }

    /// The underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Maps a sqlx error onto the repository error taxonomy, surfacing unique
/// constraint violations distinguishably.
pub(crate) fn map_sqlx_error(err: sqlx::Error, operation: &str) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation {
            return RepositoryError::UniqueViolation {
                constraint: db_err.message().to_string(),
            };
        }
    }
    RepositoryError::Backend {
        message: format!("{operation} failed"),
        source: Some(Box::new(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_create_expected_tables() {
        let db = Database::in_memory().await.unwrap();

        for table in [
            "port_allocations",
            "vlan_allocations",
            "settings",
            "service_instances",
        ] {
            let found: Option<(String,)> = sqlx::query_as(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            )
            .bind(table)
            .fetch_optional(db.pool())
            .await
            .unwrap();
            assert!(found.is_some(), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn connect_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.db");

        let _db = Database::connect(DatabaseConfig::new(&path)).await.unwrap();

        assert!(path.exists());
    }
}
