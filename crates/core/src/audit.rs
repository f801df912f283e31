//! Execution audit records.
//!
//! An audit moves `accepted -> running -> {succeeded, failed}` and is never
//! touched again once terminal.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{ArtifactId, AuditId};

/// Lifecycle status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Accepted,
    Running,
    Succeeded,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Accepted => "accepted",
            AuditStatus::Running => "running",
            AuditStatus::Succeeded => "succeeded",
            AuditStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AuditStatus::Succeeded | AuditStatus::Failed)
    }

    /// Whether `self -> next` is an allowed step.
    pub fn can_transition_to(&self, next: AuditStatus) -> bool {
        matches!(
            (self, next),
            (AuditStatus::Accepted, AuditStatus::Running)
                | (AuditStatus::Running, AuditStatus::Succeeded)
                | (AuditStatus::Running, AuditStatus::Failed)
        )
    }
}

impl core::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accepted" => Ok(AuditStatus::Accepted),
            "running" => Ok(AuditStatus::Running),
            "succeeded" => Ok(AuditStatus::Succeeded),
            "failed" => Ok(AuditStatus::Failed),
            other => Err(DomainError::validation(format!("unknown audit status: {other}"))),
        }
    }
}

/// Record of one execution attempt of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAudit {
    pub id: AuditId,
    /// Back-reference; `None` once the artifact row is gone.
    pub code_id: Option<ArtifactId>,
    /// Denormalized so the audit outlives renames and deletes.
    pub code_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: AuditStatus,
    pub error: Option<String>,
    pub input: JsonValue,
}

impl ExecutionAudit {
    /// New audit in `accepted`.
    pub fn accepted(code_id: ArtifactId, code_name: impl Into<String>, input: JsonValue) -> Self {
        Self {
            id: AuditId::new(),
            code_id: Some(code_id),
            code_name: code_name.into(),
            started_at: Utc::now(),
            completed_at: None,
            status: AuditStatus::Accepted,
            error: None,
            input,
        }
    }

    pub fn mark_running(&mut self) -> DomainResult<()> {
        self.transition(AuditStatus::Running)?;
        self.started_at = Utc::now();
        Ok(())
    }

    pub fn mark_succeeded(&mut self) -> DomainResult<()> {
        self.transition(AuditStatus::Succeeded)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.transition(AuditStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    fn transition(&mut self, next: AuditStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::invalid_transition(format!(
                "audit {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}
