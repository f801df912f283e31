//! Execution orchestrator: resolve, audit, dispatch, finalize.
//!
//! Adapter failures never escape as errors; they end up in the returned
//! audit with status `failed`. Only a missing or disabled artifact, or a
//! broken store before execution starts, is reported as an `Err`.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{error, info, instrument, warn};

use codeflow_core::{ArtifactRef, AuditStatus, CodeArtifact, ExecutionAudit};
use codeflow_runtime::{AdapterSet, ExecutionError, RunRequest};

use crate::audit::{AuditError, AuditLog};
use crate::registry::{CodeRegistry, RegistryError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    #[error("code not found: {0}")]
    NotFound(String),
    #[error("code is disabled: {0}")]
    ArtifactDisabled(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<dyn CodeRegistry>,
    audits: Arc<dyn AuditLog>,
    adapters: AdapterSet,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn CodeRegistry>,
        audits: Arc<dyn AuditLog>,
        adapters: AdapterSet,
    ) -> Self {
        Self {
            registry,
            audits,
            adapters,
        }
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Run an artifact once and return its terminal audit.
    #[instrument(skip(self, payload), fields(artifact = %reference))]
    pub async fn execute(
        &self,
        reference: &ArtifactRef,
        payload: JsonValue,
    ) -> Result<ExecutionAudit, OrchestratorError> {
        let artifact = self
            .registry
            .resolve(reference)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(reference.to_string()))?;
        if !artifact.is_ready() {
            return Err(OrchestratorError::ArtifactDisabled(artifact.name));
        }

        let mut audit = self
            .audits
            .create(artifact.id, &artifact.name, payload.clone())
            .await?;
        self.audits.mark_running(audit.id).await?;
        audit.mark_running().map_err(AuditError::from)?;

        let outcome = self.run_adapter(artifact, payload).await;

        let stored = match &outcome {
            Ok(()) => {
                info!(audit_id = %audit.id, "execution succeeded");
                audit.mark_succeeded().map_err(AuditError::from)?;
                self.audits.mark_succeeded(audit.id).await
            }
            Err(e) => {
                if e.is_fatal_config() {
                    error!(audit_id = %audit.id, error = %e, "execution impossible in this build");
                } else {
                    warn!(audit_id = %audit.id, error = %e, "execution failed");
                }
                let message = e.to_string();
                audit.mark_failed(&message).map_err(AuditError::from)?;
                self.audits.mark_failed(audit.id, &message).await
            }
        };
        if let Err(e) = stored {
            error!(audit_id = %audit.id, error = %e, "failed to record execution outcome");
            return Ok(audit);
        }

        match self.audits.find(audit.id).await {
            Ok(Some(reloaded)) if reloaded.status.is_terminal() => Ok(reloaded),
            Ok(_) => Ok(audit),
            Err(e) => {
                warn!(audit_id = %audit.id, error = %e, "audit re-read failed; returning local copy");
                Ok(audit)
            }
        }
    }

    /// Run the adapter on the blocking pool; a panic becomes a runtime error.
    async fn run_adapter(&self, artifact: CodeArtifact, payload: JsonValue) -> Result<(), ExecutionError> {
        let adapter = self.adapters.for_language(artifact.language).clone();
        let joined = tokio::task::spawn_blocking(move || {
            let request = RunRequest {
                unit_name: &artifact.name,
                source: &artifact.source,
                entry_point: artifact.entry_point(),
                payload: &payload,
            };
            adapter.run(&request)
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(e) => Err(ExecutionError::runtime(format!("execution aborted: {e}"))),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("adapters", &self.adapters)
            .finish_non_exhaustive()
    }
}

/// Whether an audit ended in `succeeded`.
pub fn succeeded(audit: &ExecutionAudit) -> bool {
    audit.status == AuditStatus::Succeeded
}
