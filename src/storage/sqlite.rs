use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::{RecordFilter, RecordKind, Storage, StoredRecord};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database, used by tests and dry runs.
    ///
    /// The pool is pinned to one connection that never expires, otherwise the
    /// database would vanish with the connection.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn put(&self, record: &StoredRecord) -> StorageResult<()> {
        let body = serde_json::to_string(&record.body).map_err(|e| StorageError::Decode {
            kind: record.kind.to_string(),
            id: record.id.clone(),
            message: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO records (kind, id, session_id, schema_version, body, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (kind, id) DO UPDATE SET
                session_id = excluded.session_id,
                schema_version = excluded.schema_version,
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.kind.as_str())
        .bind(&record.id)
        .bind(&record.session_id)
        .bind(record.schema_version)
        .bind(&body)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(kind = %record.kind, id = %record.id, "Record stored");
        Ok(())
    }

    async fn get(&self, kind: RecordKind, id: &str) -> StorageResult<Option<StoredRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT kind, id, session_id, schema_version, body, created_at, updated_at
            FROM records
            WHERE kind = ? AND id = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredRecord::try_from).transpose()
    }

    async fn list(
        &self,
        kind: RecordKind,
        filter: &RecordFilter,
    ) -> StorageResult<Vec<StoredRecord>> {
        let rows: Vec<RecordRow> = match &filter.session_id {
            Some(session_id) => {
                sqlx::query_as(
                    r#"
                    SELECT kind, id, session_id, schema_version, body, created_at, updated_at
                    FROM records
                    WHERE kind = ? AND session_id = ?
                    ORDER BY created_at ASC, rowid ASC
                    "#,
                )
                .bind(kind.as_str())
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT kind, id, session_id, schema_version, body, created_at, updated_at
                    FROM records
                    WHERE kind = ?
                    ORDER BY created_at ASC, rowid ASC
                    "#,
                )
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(StoredRecord::try_from).collect()
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM records WHERE kind = ? AND id = ?")
            .bind(kind.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::RecordNotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }
}

// Internal row type for SQLx mapping
#[derive(sqlx::FromRow)]
struct RecordRow {
    kind: String,
    id: String,
    session_id: Option<String>,
    schema_version: i64,
    body: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<RecordRow> for StoredRecord {
    type Error = StorageError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let decode_error = |message: String| StorageError::Decode {
            kind: row.kind.clone(),
            id: row.id.clone(),
            message,
        };

        let kind = RecordKind::from_str(&row.kind).map_err(decode_error)?;
        let body = serde_json::from_str(&row.body).map_err(|e| decode_error(e.to_string()))?;
        let created_at = parse_timestamp(&row.created_at).map_err(decode_error)?;
        let updated_at = parse_timestamp(&row.updated_at).map_err(decode_error)?;

        Ok(Self {
            kind,
            id: row.id,
            session_id: row.session_id,
            schema_version: row.schema_version,
            body,
            created_at,
            updated_at,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", value, e))
}
