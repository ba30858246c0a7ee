use crate::error::StorageError;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::time::Duration;

// Values are stored as JSON text under a string key
const MIGRATIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL -- Unix Timestamp (seconds)
);
";

/// Key/value store for opaque serialized values, backed by SQLite.
///
/// The store knows nothing about the shape of what it holds. Cloning is cheap
/// and every clone talks to the same database.
#[derive(Debug, Clone)]
pub struct StorageManager {
    pool: SqlitePool,
}

impl StorageManager {
    /// Opens (creating if needed) the database at `db_path` and runs migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StorageError> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to database: {}", db_url);

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Database file not found, creating...");
            Sqlite::create_database(&db_url).await?;
        }

        let pool = SqlitePoolOptions::new().connect(&db_url).await?;
        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// A private store that lives only as long as this value and its clones.
    pub async fn in_memory() -> Result<Self, StorageError> {
        // Every in-memory connection is its own database, so pin exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect("sqlite::memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), StorageError> {
        log::debug!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL).execute(pool).await?;
        Ok(())
    }

    /// Serializes `value` and writes it under `key`, replacing any previous value.
    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(value).map_err(|source| StorageError::Serialize {
            key: key.to_string(),
            source,
        })?;
        log::debug!("Saving {} bytes under key: {}", serialized.len(), key);

        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(serialized)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            log::error!("Failed to save data for key {}: {:?}", key, e);
            StorageError::from(e)
        })?;

        Ok(())
    }

    /// Reads and deserializes the value under `key`.
    ///
    /// Returns `None` when the key was never written, and also when the stored
    /// text no longer deserializes into `T` or cannot be read at all. Those
    /// cases are logged, never returned as errors.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let row = match sqlx::query("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                log::error!("Failed to load data for key {}: {:?}", key, e);
                return None;
            }
        };

        let serialized: String = match row.try_get("value") {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Stored value for key {} is not text: {:?}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&serialized) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Discarding unreadable data for key {}: {}", key, e);
                None
            }
        }
    }

    /// Deletes the value under `key`. Missing keys are not an error.
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            log::debug!("Nothing stored under key {}, nothing removed", key);
        }
        Ok(())
    }

    /// Deletes every key in the store.
    pub async fn clear(&self) -> Result<(), StorageError> {
        log::warn!("Clearing all stored data");
        sqlx::query("DELETE FROM kv").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
