//! Postgres-backed audit log (`execution_audits` table).
//!
//! Marks are conditional updates on the current status, so a record that is
//! already terminal is never rewritten.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use codeflow_core::{ArtifactId, AuditId, AuditStatus, DomainError, ExecutionAudit};

use super::{AuditError, AuditLog};
use crate::db::describe;

const COLUMNS: &str = "id, code_id, code_name, started_at, completed_at, status, error, input";

#[derive(Debug, Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Move `id` from `from` to `to`; explains a miss as not-found or a
    /// rejected transition.
    async fn transition(
        &self,
        operation: &'static str,
        id: AuditId,
        from: AuditStatus,
        to: AuditStatus,
        error: Option<&str>,
    ) -> Result<(), AuditError> {
        let stamp = if to.is_terminal() { "completed_at" } else { "started_at" };
        let sql = format!(
            "UPDATE execution_audits SET status = $3, {stamp} = NOW(), error = COALESCE($4, error) \
             WHERE id = $1 AND status = $2"
        );
        let result = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.find(id).await? {
            None => Err(AuditError::NotFound(id)),
            Some(current) => Err(AuditError::Transition(DomainError::invalid_transition(
                format!("audit {id} cannot move from {} to {to}", current.status),
            ))),
        }
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    #[instrument(skip(self, input), err)]
    async fn create(
        &self,
        code_id: ArtifactId,
        code_name: &str,
        input: JsonValue,
    ) -> Result<ExecutionAudit, AuditError> {
        let audit = ExecutionAudit::accepted(code_id, code_name, input);
        let sql = format!(
            "INSERT INTO execution_audits (id, code_id, code_name, started_at, status, input) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(*audit.id.as_uuid())
            .bind(audit.code_id.map(|id| *id.as_uuid()))
            .bind(&audit.code_name)
            .bind(audit.started_at)
            .bind(audit.status.as_str())
            .bind(&audit.input)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create", e))?;
        decode(row)
    }

    #[instrument(skip(self), err)]
    async fn mark_running(&self, id: AuditId) -> Result<(), AuditError> {
        self.transition("mark_running", id, AuditStatus::Accepted, AuditStatus::Running, None)
            .await
    }

    #[instrument(skip(self), err)]
    async fn mark_succeeded(&self, id: AuditId) -> Result<(), AuditError> {
        self.transition("mark_succeeded", id, AuditStatus::Running, AuditStatus::Succeeded, None)
            .await
    }

    #[instrument(skip(self), err)]
    async fn mark_failed(&self, id: AuditId, error: &str) -> Result<(), AuditError> {
        self.transition("mark_failed", id, AuditStatus::Running, AuditStatus::Failed, Some(error))
            .await
    }

    #[instrument(skip(self), err)]
    async fn find(&self, id: AuditId) -> Result<Option<ExecutionAudit>, AuditError> {
        let sql = format!("SELECT {COLUMNS} FROM execution_audits WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find", e))?;
        row.map(decode).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_for_artifact(
        &self,
        code_id: ArtifactId,
        limit: usize,
    ) -> Result<Vec<ExecutionAudit>, AuditError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM execution_audits WHERE code_id = $1 \
             ORDER BY started_at DESC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(*code_id.as_uuid())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_for_artifact", e))?;
        rows.into_iter().map(decode).collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AuditError {
    AuditError::Storage(describe(operation, &err))
}

fn decode(row: PgRow) -> Result<ExecutionAudit, AuditError> {
    AuditRow::from_row(&row)
        .map_err(|e| AuditError::Decode(e.to_string()))?
        .try_into()
}

// SQLx row types

#[derive(Debug)]
struct AuditRow {
    id: Uuid,
    code_id: Option<Uuid>,
    code_name: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: String,
    error: Option<String>,
    input: Option<JsonValue>,
}

impl<'r> FromRow<'r, PgRow> for AuditRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AuditRow {
            id: row.try_get("id")?,
            code_id: row.try_get("code_id")?,
            code_name: row.try_get("code_name")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            input: row.try_get("input")?,
        })
    }
}

impl TryFrom<AuditRow> for ExecutionAudit {
    type Error = AuditError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e: DomainError| AuditError::Decode(e.to_string()))?;
        Ok(ExecutionAudit {
            id: AuditId::from_uuid(row.id),
            code_id: row.code_id.map(ArtifactId::from_uuid),
            code_name: row.code_name,
            started_at: row.started_at,
            completed_at: row.completed_at,
            status,
            error: row.error,
            input: row.input.unwrap_or(JsonValue::Null),
        })
    }
}
