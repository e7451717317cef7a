//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::UploadRepo;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: UploadRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and apply the schema.
    pub async fn new(path: impl AsRef<Path>, busy_timeout_secs: u64) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers, so the conditional
            // completion update never races another connection.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "Opened SQLite upload store");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;

        // Check for an incompatible schema left by an older build. SQLite
        // cannot retrofit NOT NULL columns, so refuse to start instead.
        let columns: Vec<(i32, String, String, i32, Option<String>, i32)> =
            sqlx::query_as("PRAGMA table_info(uploads)")
                .fetch_all(&self.pool)
                .await?;
        let required_columns = ["handler", "payload", "extension", "finalize_claimed_until"];
        let missing: Vec<&str> = required_columns
            .iter()
            .filter(|col| !columns.iter().any(|(_, name, _, _, _, _)| name == *col))
            .copied()
            .collect();

        if !missing.is_empty() {
            return Err(MetadataError::Internal(format!(
                "Incompatible database schema detected: uploads table is missing columns: {}. \
                 Delete the database file and restart to create a fresh schema.",
                missing.join(", ")
            )));
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::UploadRow;
    use time::OffsetDateTime;

    #[async_trait]
    impl UploadRepo for SqliteStore {
        async fn create_upload(&self, upload: &UploadRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO uploads (
                    token, declared_size, declared_chunk_count, original_name,
                    mime_type, extension, handler, payload, is_complete,
                    created_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&upload.token)
            .bind(upload.declared_size)
            .bind(upload.declared_chunk_count)
            .bind(&upload.original_name)
            .bind(&upload.mime_type)
            .bind(&upload.extension)
            .bind(&upload.handler)
            .bind(&upload.payload)
            .bind(upload.is_complete)
            .bind(upload.created_at)
            .bind(upload.completed_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db_err)) => {
                    // SQLite reports "UNIQUE constraint failed: uploads.token".
                    let msg = db_err.message();
                    if msg.contains("UNIQUE constraint") && msg.contains("uploads") {
                        Err(MetadataError::AlreadyExists(format!(
                            "upload token {} already exists",
                            &upload.token[..8.min(upload.token.len())]
                        )))
                    } else {
                        Err(sqlx::Error::Database(db_err).into())
                    }
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_upload(&self, token: &str) -> MetadataResult<Option<UploadRow>> {
            let row = sqlx::query_as::<_, UploadRow>("SELECT * FROM uploads WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_incomplete_upload(&self, token: &str) -> MetadataResult<Option<UploadRow>> {
            let row = sqlx::query_as::<_, UploadRow>(
                "SELECT * FROM uploads WHERE token = ? AND is_complete = 0",
            )
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn claim_finalize(
            &self,
            token: &str,
            now: OffsetDateTime,
            expires_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE uploads
                SET finalize_claimed_until = ?
                WHERE token = ? AND is_complete = 0
                  AND (finalize_claimed_until IS NULL OR finalize_claimed_until <= ?)
                "#,
            )
            .bind(unix_millis(expires_at))
            .bind(token)
            .bind(unix_millis(now))
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn release_finalize(&self, token: &str) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE uploads SET finalize_claimed_until = NULL WHERE token = ? AND is_complete = 0",
            )
            .bind(token)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn mark_complete(
            &self,
            token: &str,
            completed_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            // Only transitions if the record is still incomplete.
            let result = sqlx::query(
                r#"
                UPDATE uploads
                SET is_complete = 1, completed_at = ?, finalize_claimed_until = NULL
                WHERE token = ? AND is_complete = 0
                "#,
            )
            .bind(completed_at)
            .bind(token)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn count_incomplete_uploads(&self) -> MetadataResult<u64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM uploads WHERE is_complete = 0")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        }
    }
}

/// Claim expiry is stored as integer milliseconds so comparisons are numeric.
fn unix_millis(at: time::OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS uploads (
    token TEXT PRIMARY KEY,
    declared_size INTEGER NOT NULL CHECK (declared_size > 0),
    declared_chunk_count INTEGER NOT NULL CHECK (declared_chunk_count > 0),
    original_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    extension TEXT NOT NULL DEFAULT '',
    handler TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT 'null',
    is_complete INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    finalize_claimed_until INTEGER
);
CREATE INDEX IF NOT EXISTS idx_uploads_incomplete ON uploads(is_complete) WHERE is_complete = 0;
"#;
