//! Artifact lifecycle: register, approve, disable/enable, audit listing.
//!
//! Approval is the path that replaces source under an existing name. It
//! refuses compiled sources that do not compile, drops stale cached units
//! for the name and queues the follow-up `compile` and `publish` jobs.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tracing::{info, instrument, warn};

use codeflow_core::{
    ArtifactRef, ArtifactStatus, CodeArtifact, DomainError, ExecutionAudit, JobId, Language,
    NewArtifact,
};
use codeflow_runtime::{AdapterSet, ExecutionError, RunRequest};

use crate::audit::{AuditError, AuditLog};
use crate::jobs::{JobKind, JobQueue};
use crate::registry::{CodeRegistry, RegistryError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApprovalError {
    #[error("invalid artifact: {0}")]
    Invalid(#[from] DomainError),
    #[error("artifact name already registered: {0}")]
    Duplicate(String),
    #[error("smoke test failed: {0}")]
    SmokeTest(ExecutionError),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Registry(RegistryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl From<RegistryError> for ApprovalError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Invalid(e) => Self::Invalid(e),
            RegistryError::Duplicate(name) => Self::Duplicate(name),
            RegistryError::NotFound(name) => Self::NotFound(name),
            other => Self::Registry(other),
        }
    }
}

/// Result of an approval.
#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    pub artifact: CodeArtifact,
    /// Follow-up jobs that were queued; enqueue failures are left out.
    pub jobs: Vec<JobId>,
    pub notes: String,
}

#[derive(Clone)]
pub struct ArtifactService {
    registry: Arc<dyn CodeRegistry>,
    audits: Arc<dyn AuditLog>,
    queue: Arc<dyn JobQueue>,
    adapters: AdapterSet,
    base_url: String,
}

impl ArtifactService {
    pub fn new(
        registry: Arc<dyn CodeRegistry>,
        audits: Arc<dyn AuditLog>,
        queue: Arc<dyn JobQueue>,
        adapters: AdapterSet,
    ) -> Self {
        Self {
            registry,
            audits,
            queue,
            adapters,
            base_url: String::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Insert a new artifact in `ready`. Taken names are refused.
    #[instrument(skip(self, new), fields(artifact = %new.name), err)]
    pub async fn register(&self, new: NewArtifact) -> Result<CodeArtifact, ApprovalError> {
        let artifact = self.registry.insert(new).await?;
        info!(artifact_id = %artifact.id, language = %artifact.language, "artifact registered");
        Ok(artifact)
    }

    #[instrument(skip(self, new), fields(artifact = %new.name), err)]
    pub async fn approve(&self, new: NewArtifact) -> Result<Approval, ApprovalError> {
        let new = new.validate()?;

        if new.language == Language::Compiled {
            self.smoke_test(&new).await?;
        }

        let artifact = self.registry.upsert(new).await?;
        // Units compiled from the replaced source must not outlive the upsert.
        let dropped = self.adapters.invalidate(&artifact.name);
        info!(artifact_id = %artifact.id, dropped_units = dropped, "artifact approved");

        let mut jobs = Vec::with_capacity(2);
        let mut publish_job = None;
        for kind in [JobKind::Compile, JobKind::Publish] {
            match self
                .queue
                .enqueue(kind.clone(), &artifact.name, JsonValue::Object(Default::default()))
                .await
            {
                Ok(id) => {
                    if kind == JobKind::Publish {
                        publish_job = Some(id);
                    }
                    jobs.push(id);
                }
                Err(e) => warn!(kind = %kind, error = %e, "follow-up job not queued"),
            }
        }

        let mut notes = format!(
            "Approved and ready. Execute via {}/exec/{}.",
            self.base_url, artifact.name
        );
        if let Some(id) = publish_job {
            notes.push_str(&format!(" Publish job={id}."));
        }

        Ok(Approval {
            artifact,
            jobs,
            notes,
        })
    }

    /// Compile without persisting or running.
    async fn smoke_test(&self, new: &NewArtifact) -> Result<(), ApprovalError> {
        let adapter = self.adapters.for_language(new.language).clone();
        let name = new.name.clone();
        let source = new.source.clone();
        let entry_point = new
            .metadata
            .get(codeflow_core::ENTRY_POINT_KEY)
            .and_then(JsonValue::as_str)
            .map(str::to_owned);

        let joined = tokio::task::spawn_blocking(move || {
            let payload = json!({});
            adapter.prepare(&RunRequest {
                unit_name: &name,
                source: &source,
                entry_point: entry_point.as_deref(),
                payload: &payload,
            })
        })
        .await;

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ApprovalError::SmokeTest(e)),
            Err(e) => Err(ApprovalError::SmokeTest(ExecutionError::compile(format!(
                "compiler aborted: {e}"
            )))),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn disable(&self, name: &str) -> Result<CodeArtifact, ApprovalError> {
        let artifact = self.registry.set_status(name, ArtifactStatus::Disabled).await?;
        info!(artifact_id = %artifact.id, "artifact disabled");
        Ok(artifact)
    }

    #[instrument(skip(self), err)]
    pub async fn enable(&self, name: &str) -> Result<CodeArtifact, ApprovalError> {
        let artifact = self.registry.set_status(name, ArtifactStatus::Ready).await?;
        info!(artifact_id = %artifact.id, "artifact enabled");
        Ok(artifact)
    }

    pub async fn list(&self) -> Result<Vec<CodeArtifact>, ApprovalError> {
        Ok(self.registry.list_all().await?)
    }

    pub async fn find(&self, reference: &ArtifactRef) -> Result<Option<CodeArtifact>, ApprovalError> {
        Ok(self.registry.resolve(reference).await?)
    }

    /// Audits for one artifact, newest first.
    pub async fn list_audits(
        &self,
        reference: &ArtifactRef,
        limit: usize,
    ) -> Result<Vec<ExecutionAudit>, ApprovalError> {
        let artifact = self
            .registry
            .resolve(reference)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(reference.to_string()))?;
        Ok(self.audits.list_for_artifact(artifact.id, limit).await?)
    }
}

impl std::fmt::Debug for ArtifactService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactService")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
