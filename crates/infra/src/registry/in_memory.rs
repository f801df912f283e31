//! In-memory code registry for tests/dev.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use codeflow_core::{ArtifactId, ArtifactStatus, CodeArtifact, NewArtifact};

use super::{CodeRegistry, RegistryError};

/// Artifacts keyed by name.
#[derive(Debug, Default)]
pub struct InMemoryCodeRegistry {
    artifacts: RwLock<HashMap<String, CodeArtifact>>,
}

impl InMemoryCodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CodeRegistry for InMemoryCodeRegistry {
    async fn insert(&self, new: NewArtifact) -> Result<CodeArtifact, RegistryError> {
        let new = new.validate()?;
        let mut artifacts = self.artifacts.write().unwrap_or_else(PoisonError::into_inner);
        if artifacts.contains_key(&new.name) {
            return Err(RegistryError::Duplicate(new.name));
        }
        let artifact = CodeArtifact::from_new(new);
        artifacts.insert(artifact.name.clone(), artifact.clone());
        Ok(artifact)
    }

    async fn upsert(&self, new: NewArtifact) -> Result<CodeArtifact, RegistryError> {
        let new = new.validate()?;
        let mut artifacts = self.artifacts.write().unwrap_or_else(PoisonError::into_inner);
        let artifact = match artifacts.get(&new.name) {
            Some(existing) => CodeArtifact {
                language: new.language,
                source: new.source,
                metadata: new.metadata,
                status: ArtifactStatus::Ready,
                ..existing.clone()
            },
            None => CodeArtifact::from_new(new),
        };
        artifacts.insert(artifact.name.clone(), artifact.clone());
        Ok(artifact)
    }

    async fn find_by_id(&self, id: ArtifactId) -> Result<Option<CodeArtifact>, RegistryError> {
        let artifacts = self.artifacts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(artifacts.values().find(|a| a.id == id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<CodeArtifact>, RegistryError> {
        let artifacts = self.artifacts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(artifacts.get(name).cloned())
    }

    async fn list_all(&self) -> Result<Vec<CodeArtifact>, RegistryError> {
        let artifacts = self.artifacts.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = artifacts.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(all)
    }

    async fn set_status(
        &self,
        name: &str,
        status: ArtifactStatus,
    ) -> Result<CodeArtifact, RegistryError> {
        let mut artifacts = self.artifacts.write().unwrap_or_else(PoisonError::into_inner);
        let artifact = artifacts
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        artifact.status = status;
        Ok(artifact.clone())
    }
}
