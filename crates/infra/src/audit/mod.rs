//! Execution audit log.
//!
//! Stores enforce the `accepted -> running -> {succeeded, failed}` lifecycle:
//! a mark that does not follow it fails with `AuditError::Transition` and
//! leaves the record untouched.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use codeflow_core::{ArtifactId, AuditId, DomainError, ExecutionAudit};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryAuditLog;
pub use postgres::PostgresAuditLog;

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditError {
    #[error("audit not found: {0}")]
    NotFound(AuditId),
    #[error(transparent)]
    Transition(#[from] DomainError),
    #[error("corrupt audit row: {0}")]
    Decode(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Open an audit in `accepted`.
    async fn create(
        &self,
        code_id: ArtifactId,
        code_name: &str,
        input: JsonValue,
    ) -> Result<ExecutionAudit, AuditError>;

    async fn mark_running(&self, id: AuditId) -> Result<(), AuditError>;

    async fn mark_succeeded(&self, id: AuditId) -> Result<(), AuditError>;

    async fn mark_failed(&self, id: AuditId, error: &str) -> Result<(), AuditError>;

    async fn find(&self, id: AuditId) -> Result<Option<ExecutionAudit>, AuditError>;

    /// Audits of one artifact, newest first.
    async fn list_for_artifact(
        &self,
        code_id: ArtifactId,
        limit: usize,
    ) -> Result<Vec<ExecutionAudit>, AuditError>;
}
