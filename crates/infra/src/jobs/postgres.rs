//! Postgres-backed job queue (`job_queue` table).
//!
//! ## Claiming
//!
//! `claim_next` is a single statement:
//!
//! ```sql
//! UPDATE job_queue SET status = 'running', started_at = NOW(), attempts = attempts + 1
//! WHERE id = (SELECT id FROM job_queue WHERE status = 'queued'
//!             ORDER BY enqueued_at LIMIT 1 FOR UPDATE SKIP LOCKED)
//! RETURNING ...
//! ```
//!
//! Concurrent claimants skip rows another transaction has locked and move on
//! to the next queued row, so each job is handed to at most one worker and
//! nobody blocks on a contended row.
//!
//! ## Error mapping
//!
//! | SQLx error | Code | JobStoreError |
//! |------------|------|---------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Any other | | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use codeflow_core::JobId;

use super::store::{JobQueue, JobStoreError, signal_best_effort};
use super::types::{Job, JobKind, JobStats, JobStatus};
use crate::db::{describe, is_unique_violation};
use crate::wake::{NoopWakeSignal, WakeSignal};

const COLUMNS: &str =
    "id, kind, target_name, payload, status, attempts, enqueued_at, started_at, finished_at, error";

#[derive(Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
    signal: Arc<dyn WakeSignal>,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self::with_signal(pool, Arc::new(NoopWakeSignal))
    }

    pub fn with_signal(pool: PgPool, signal: Arc<dyn WakeSignal>) -> Self {
        Self { pool, signal }
    }

    async fn insert(&self, job: &Job) -> Result<JobId, JobStoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_queue (id, kind, target_name, payload, status, attempts, enqueued_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(*job.id.as_uuid())
        .bind(job.kind.as_str())
        .bind(&job.target_name)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.attempts as i32)
        .bind(job.enqueued_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("enqueue", e)
            }
        })?;
        Ok(job.id)
    }

    async fn finish(
        &self,
        operation: &'static str,
        id: JobId,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue SET status = $2, finished_at = NOW(), error = $3
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(*id.as_uuid())
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(id).await? {
            None => Err(JobStoreError::NotFound(id)),
            Some(_) => Err(JobStoreError::NotRunning(id)),
        }
    }
}

impl std::fmt::Debug for PostgresJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresJobQueue").finish_non_exhaustive()
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    #[instrument(skip(self, payload), fields(kind = %kind), err)]
    async fn enqueue(
        &self,
        kind: JobKind,
        target_name: &str,
        payload: JsonValue,
    ) -> Result<JobId, JobStoreError> {
        let id = self.insert(&Job::new(kind, target_name, payload)).await?;
        signal_best_effort(self.signal.as_ref(), id).await;
        Ok(id)
    }

    #[instrument(skip(self), err)]
    async fn enqueue_tick(&self) -> Result<JobId, JobStoreError> {
        self.insert(&Job::tick()).await
    }

    #[instrument(skip(self), err)]
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let sql = format!(
            r#"
            UPDATE job_queue
            SET status = 'running', started_at = NOW(), attempts = attempts + 1
            WHERE id = (
                SELECT id FROM job_queue
                WHERE status = 'queued'
                ORDER BY enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?;

        let job = row.map(decode).transpose()?;
        if let Some(job) = &job {
            debug!(job_id = %job.id, kind = %job.kind, attempts = job.attempts, "job claimed");
        }
        Ok(job)
    }

    #[instrument(skip(self), err)]
    async fn mark_done(&self, id: JobId) -> Result<(), JobStoreError> {
        self.finish("mark_done", id, JobStatus::Done, None).await
    }

    #[instrument(skip(self), err)]
    async fn mark_error(&self, id: JobId, message: &str) -> Result<(), JobStoreError> {
        self.finish("mark_error", id, JobStatus::Error, Some(message)).await
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let sql = format!("SELECT {COLUMNS} FROM job_queue WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.map(decode).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM job_queue WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY enqueued_at ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list", e))?;
        rows.into_iter().map(decode).collect()
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM job_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| JobStoreError::Decode(e.to_string()))?;
            let n: i64 = row.try_get("n").map_err(|e| JobStoreError::Decode(e.to_string()))?;
            let n = usize::try_from(n).unwrap_or_default();
            match JobStatus::parse(&status) {
                Some(JobStatus::Queued) => stats.queued += n,
                Some(JobStatus::Running) => stats.running += n,
                Some(JobStatus::Done) => stats.done += n,
                Some(JobStatus::Error) => stats.error += n,
                None => return Err(JobStoreError::Decode(format!("unknown job status: {status}"))),
            }
        }
        Ok(stats)
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(describe(operation, &err))
}

fn decode(row: PgRow) -> Result<Job, JobStoreError> {
    JobRow::from_row(&row)
        .map_err(|e| JobStoreError::Decode(e.to_string()))?
        .try_into()
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: Uuid,
    kind: String,
    target_name: String,
    payload: Option<JsonValue>,
    status: String,
    attempts: i32,
    enqueued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            target_name: row.try_get("target_name")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            enqueued_at: row.try_get("enqueued_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            error: row.try_get("error")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| JobStoreError::Decode(format!("unknown job status: {}", row.status)))?;
        Ok(Job {
            id: JobId::from_uuid(row.id),
            kind: JobKind::parse(&row.kind),
            target_name: row.target_name,
            payload: row
                .payload
                .unwrap_or_else(|| JsonValue::Object(Default::default())),
            status,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            enqueued_at: row.enqueued_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error: row.error,
        })
    }
}
