//! Storage layer for the metadata cache.
//!
//! This module provides database operations for:
//! - DDO documents (one row per did, soft-deleted records included)
//! - Per-chain block cursors with monotonic writes
//! - The retry queue
//! - Processing state records

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub mod cursor;
pub mod documents;
pub mod retry;
pub mod state;
pub mod types;

pub use types::*;

/// Database storage shared by every indexer task and the API.
///
/// Cloning is cheap; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// This will create the database file if it doesn't exist. Pool sizes
    /// default to 5 max and 1 min connections when `None`.
    ///
    /// # Example
    /// ```no_run
    /// # use ddocache_indexer::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://ddocache.db", None, None).await?;
    /// storage.run_migrations().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(5))
            .min_connections(min_connections.unwrap_or(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url, None, None).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let ddo_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ddos")
            .fetch_one(&self.pool)
            .await?;

        let retry_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM retry_queue")
            .fetch_one(&self.pool)
            .await?;

        let state_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ddo_state")
            .fetch_one(&self.pool)
            .await?;

        let mut chains = Vec::new();
        for chain_id in self.list_chains().await? {
            if let Some(status) = self.get_cursor_status(chain_id, CursorKind::Logs).await? {
                chains.push((chain_id, status.last_block));
            }
        }

        Ok(DatabaseStats {
            ddo_count: ddo_count as u64,
            retry_count: retry_count as u64,
            state_count: state_count as u64,
            chains,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}


#[cfg(test)]
mod tests {
    use super::test_support::storage;

    #[tokio::test]
    async fn test_storage_creation() {
        let (storage, _file) = storage().await;
        storage.health_check().await.unwrap();
        storage.close().await;
    }

    #[tokio::test]
    async fn test_database_stats() {
        let (storage, _file) = storage().await;

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.ddo_count, 0);
        assert_eq!(stats.retry_count, 0);
        assert_eq!(stats.state_count, 0);
        assert!(stats.chains.is_empty());

        storage.close().await;
    }
}
