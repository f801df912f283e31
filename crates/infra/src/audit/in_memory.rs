//! In-memory audit log for tests/dev.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use codeflow_core::{ArtifactId, AuditId, DomainResult, ExecutionAudit};

use super::{AuditError, AuditLog};

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    audits: RwLock<HashMap<AuditId, ExecutionAudit>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(
        &self,
        id: AuditId,
        apply: impl FnOnce(&mut ExecutionAudit) -> DomainResult<()>,
    ) -> Result<(), AuditError> {
        let mut audits = self.audits.write().unwrap_or_else(PoisonError::into_inner);
        let audit = audits.get_mut(&id).ok_or(AuditError::NotFound(id))?;
        // Apply to a copy so a rejected transition leaves the record as it was.
        let mut next = audit.clone();
        apply(&mut next)?;
        *audit = next;
        Ok(())
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn create(
        &self,
        code_id: ArtifactId,
        code_name: &str,
        input: JsonValue,
    ) -> Result<ExecutionAudit, AuditError> {
        let audit = ExecutionAudit::accepted(code_id, code_name, input);
        self.audits
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(audit.id, audit.clone());
        Ok(audit)
    }

    async fn mark_running(&self, id: AuditId) -> Result<(), AuditError> {
        self.update(id, ExecutionAudit::mark_running)
    }

    async fn mark_succeeded(&self, id: AuditId) -> Result<(), AuditError> {
        self.update(id, ExecutionAudit::mark_succeeded)
    }

    async fn mark_failed(&self, id: AuditId, error: &str) -> Result<(), AuditError> {
        self.update(id, |audit| audit.mark_failed(error))
    }

    async fn find(&self, id: AuditId) -> Result<Option<ExecutionAudit>, AuditError> {
        let audits = self.audits.read().unwrap_or_else(PoisonError::into_inner);
        Ok(audits.get(&id).cloned())
    }

    async fn list_for_artifact(
        &self,
        code_id: ArtifactId,
        limit: usize,
    ) -> Result<Vec<ExecutionAudit>, AuditError> {
        let audits = self.audits.read().unwrap_or_else(PoisonError::into_inner);
        let mut result: Vec<_> = audits
            .values()
            .filter(|a| a.code_id == Some(code_id))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }
}
