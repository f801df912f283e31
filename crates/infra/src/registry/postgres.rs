//! Postgres-backed code registry (`code_artifacts` table).
//!
//! Name uniqueness is enforced by the table's unique constraint; a `23505`
//! on insert maps to `RegistryError::Duplicate`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use codeflow_core::{ArtifactId, ArtifactStatus, CodeArtifact, NewArtifact};

use super::{CodeRegistry, RegistryError};
use crate::db::{describe, is_unique_violation};

const COLUMNS: &str = "id, name, language, source, metadata, status, created_at, created_by";

#[derive(Debug, Clone)]
pub struct PostgresCodeRegistry {
    pool: PgPool,
}

impl PostgresCodeRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CodeRegistry for PostgresCodeRegistry {
    #[instrument(skip(self, new), fields(artifact = %new.name), err)]
    async fn insert(&self, new: NewArtifact) -> Result<CodeArtifact, RegistryError> {
        let new = new.validate()?;
        let artifact = CodeArtifact::from_new(new);

        let sql = format!(
            "INSERT INTO code_artifacts ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {COLUMNS}"
        );
        let row = bind_artifact(sqlx::query(&sql), &artifact)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RegistryError::Duplicate(artifact.name.clone())
                } else {
                    map_sqlx_error("insert", e)
                }
            })?;
        decode(row)
    }

    #[instrument(skip(self, new), fields(artifact = %new.name), err)]
    async fn upsert(&self, new: NewArtifact) -> Result<CodeArtifact, RegistryError> {
        let new = new.validate()?;
        let artifact = CodeArtifact::from_new(new);

        let sql = format!(
            r#"
            INSERT INTO code_artifacts ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name) DO UPDATE SET
                language = EXCLUDED.language,
                source = EXCLUDED.source,
                metadata = EXCLUDED.metadata,
                status = EXCLUDED.status
            RETURNING {COLUMNS}
            "#
        );
        let row = bind_artifact(sqlx::query(&sql), &artifact)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("upsert", e))?;
        decode(row)
    }

    #[instrument(skip(self), err)]
    async fn find_by_id(&self, id: ArtifactId) -> Result<Option<CodeArtifact>, RegistryError> {
        let sql = format!("SELECT {COLUMNS} FROM code_artifacts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;
        row.map(decode).transpose()
    }

    #[instrument(skip(self), err)]
    async fn find_by_name(&self, name: &str) -> Result<Option<CodeArtifact>, RegistryError> {
        let sql = format!("SELECT {COLUMNS} FROM code_artifacts WHERE name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_name", e))?;
        row.map(decode).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_all(&self) -> Result<Vec<CodeArtifact>, RegistryError> {
        let sql = format!("SELECT {COLUMNS} FROM code_artifacts ORDER BY created_at ASC, name ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_all", e))?;
        rows.into_iter().map(decode).collect()
    }

    #[instrument(skip(self), err)]
    async fn set_status(
        &self,
        name: &str,
        status: ArtifactStatus,
    ) -> Result<CodeArtifact, RegistryError> {
        let sql = format!("UPDATE code_artifacts SET status = $2 WHERE name = $1 RETURNING {COLUMNS}");
        let row = sqlx::query(&sql)
            .bind(name)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_status", e))?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        decode(row)
    }
}

fn bind_artifact<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    artifact: &'q CodeArtifact,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(*artifact.id.as_uuid())
        .bind(&artifact.name)
        .bind(artifact.language.as_str())
        .bind(&artifact.source)
        .bind(&artifact.metadata)
        .bind(artifact.status.as_str())
        .bind(artifact.created_at)
        .bind(&artifact.created_by)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RegistryError {
    if is_unique_violation(&err) {
        return RegistryError::Duplicate(describe(operation, &err));
    }
    RegistryError::Storage(describe(operation, &err))
}

fn decode(row: PgRow) -> Result<CodeArtifact, RegistryError> {
    ArtifactRow::from_row(&row)
        .map_err(|e| RegistryError::Decode(e.to_string()))?
        .try_into()
}

// SQLx row types

#[derive(Debug)]
struct ArtifactRow {
    id: Uuid,
    name: String,
    language: String,
    source: String,
    metadata: Option<serde_json::Value>,
    status: String,
    created_at: DateTime<Utc>,
    created_by: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for ArtifactRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ArtifactRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            language: row.try_get("language")?,
            source: row.try_get("source")?,
            metadata: row.try_get("metadata")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            created_by: row.try_get("created_by")?,
        })
    }
}

impl TryFrom<ArtifactRow> for CodeArtifact {
    type Error = RegistryError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        let decode_err = |e: codeflow_core::DomainError| RegistryError::Decode(format!("{}: {e}", row.name));
        Ok(CodeArtifact {
            id: ArtifactId::from_uuid(row.id),
            language: row.language.parse().map_err(decode_err)?,
            status: row.status.parse().map_err(decode_err)?,
            name: row.name,
            source: row.source,
            metadata: row
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            created_at: row.created_at,
            created_by: row.created_by,
        })
    }
}
