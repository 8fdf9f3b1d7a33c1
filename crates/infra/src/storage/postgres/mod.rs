//! Postgres-backed storage.
//!
//! `PostgresAuthStore` implements every storage contract and the
//! transactional linked write on one `sqlx` pool.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | `StorageError` |
//! |------------|---------------|----------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any other | `Backend` |
//! | `PoolClosed`, `PoolTimedOut`, `Io`, `Tls` | n/a | `Unavailable` |
//! | `RowNotFound` | n/a | `NotFound` |
//! | anything else | n/a | `Backend` |
//!
//! Every statement runs under the caller's [`CallContext`]; cancellation
//! drops the in-flight future, which aborts the statement.

mod audit;
mod auth;
mod authz;
mod subject_auth;
mod tx;

use std::future::Future;
use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::instrument;

use authcore_core::CallContext;

use crate::config::PostgresConfig;
use crate::storage::StorageError;

/// DDL for every table the adapter touches. Idempotent.
pub const SCHEMA_SQL: &str = include_str!("../../../migrations/0001_auth.sql");

#[derive(Debug, Clone)]
pub struct PostgresAuthStore {
    pool: Arc<PgPool>,
}

impl PostgresAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from configuration and verify connectivity.
    #[instrument(skip(config), fields(max_connections = config.max_connections), err)]
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        store.ping(&CallContext::new()).await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self, ctx: &CallContext) -> Result<(), StorageError> {
        run(ctx, "ping", sqlx::query("SELECT 1").execute(&*self.pool)).await?;
        Ok(())
    }

    /// Create any missing tables and indexes.
    #[instrument(skip(self, ctx), err)]
    pub async fn ensure_schema(&self, ctx: &CallContext) -> Result<(), StorageError> {
        run(ctx, "ensure_schema", sqlx::raw_sql(SCHEMA_SQL).execute(&*self.pool)).await?;
        Ok(())
    }

    /// Close the pool; later calls fail with `Unavailable`.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Row-level behavior when a write hits an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnConflict {
    /// Replace the existing row.
    Update,
    /// Surface the unique violation.
    Fail,
}

/// Drive a sqlx future under the call context and map its error.
async fn run<T, F>(ctx: &CallContext, operation: &'static str, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    ctx.run(fut)
        .await?
        .map_err(|e| map_sqlx_error(operation, e))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StorageError::Conflict(msg),
                _ => StorageError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StorageError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StorageError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::Io(e) => StorageError::Unavailable(format!("io error in {}: {}", operation, e)),
        sqlx::Error::Tls(e) => StorageError::Unavailable(format!("tls error in {}: {}", operation, e)),
        sqlx::Error::RowNotFound => StorageError::NotFound(format!("row not found in {}", operation)),
        _ => StorageError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn decode_error(operation: &str, column: &str, err: impl core::fmt::Display) -> StorageError {
    StorageError::Backend(format!("invalid {} in {}: {}", column, operation, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_declares_every_table() {
        for table in [
            "auth",
            "auth_metadata",
            "subject_auth",
            "auth_log",
            "subject_role",
            "subject_permission",
        ] {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing table {table}"
            );
        }
        assert!(SCHEMA_SQL.contains("auth_id        UUID NOT NULL UNIQUE"));
    }

    #[test]
    fn pool_errors_are_unavailable() {
        assert!(map_sqlx_error("op", sqlx::Error::PoolClosed).is_unavailable());
        assert!(map_sqlx_error("op", sqlx::Error::PoolTimedOut).is_unavailable());
        assert!(matches!(
            map_sqlx_error("op", sqlx::Error::RowNotFound),
            StorageError::NotFound(_)
        ));
    }
}
