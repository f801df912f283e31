//! Connection pool and schema bootstrap.

pub use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, instrument};

use crate::config::AppConfig;

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingUrl,
    #[error("database error in {operation}: {source}")]
    Sqlx {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Open a pool against `config.database_url`.
pub async fn connect(config: &AppConfig) -> Result<PgPool, DbError> {
    let url = config.database_url.as_deref().ok_or(DbError::MissingUrl)?;
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await
        .map_err(|source| DbError::Sqlx {
            operation: "connect",
            source,
        })
}

/// Create tables and indexes if they are missing.
#[instrument(skip(pool), err)]
pub async fn bootstrap_schema(pool: &PgPool) -> Result<(), DbError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|source| DbError::Sqlx {
            operation: "bootstrap_schema",
            source,
        })?;
    info!("schema ready");
    Ok(())
}

/// Unique constraint violation (`23505`).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// One-line description of a sqlx failure tagged with the operation.
pub(crate) fn describe(operation: &str, err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => {
            format!("database error in {operation}: {}", db_err.message())
        }
        sqlx::Error::PoolClosed => format!("connection pool closed in {operation}"),
        other => format!("sqlx error in {operation}: {other}"),
    }
}
