//! Code registry: named, language-tagged artifacts.
//!
//! Names are unique. `insert` rejects a taken name; `upsert` replaces the
//! language, source and metadata of an existing name and puts it back to
//! `ready`, keeping its id and creation time.

use async_trait::async_trait;

use codeflow_core::{
    ArtifactId, ArtifactRef, ArtifactStatus, CodeArtifact, DomainError, NewArtifact,
};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCodeRegistry;
pub use postgres::PostgresCodeRegistry;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid artifact: {0}")]
    Invalid(#[from] DomainError),
    #[error("artifact name already registered: {0}")]
    Duplicate(String),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("corrupt artifact row: {0}")]
    Decode(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait CodeRegistry: Send + Sync {
    /// Register a new artifact in `ready`.
    async fn insert(&self, new: NewArtifact) -> Result<CodeArtifact, RegistryError>;

    /// Insert, or replace the source of an existing name.
    async fn upsert(&self, new: NewArtifact) -> Result<CodeArtifact, RegistryError>;

    async fn find_by_id(&self, id: ArtifactId) -> Result<Option<CodeArtifact>, RegistryError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<CodeArtifact>, RegistryError>;

    /// Every artifact, oldest first.
    async fn list_all(&self) -> Result<Vec<CodeArtifact>, RegistryError>;

    async fn set_status(
        &self,
        name: &str,
        status: ArtifactStatus,
    ) -> Result<CodeArtifact, RegistryError>;

    async fn resolve(&self, reference: &ArtifactRef) -> Result<Option<CodeArtifact>, RegistryError> {
        match reference {
            ArtifactRef::Id(id) => self.find_by_id(*id).await,
            ArtifactRef::Name(name) => self.find_by_name(name).await,
        }
    }
}
