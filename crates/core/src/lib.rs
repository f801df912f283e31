//! `codeflow-core`: shared model for registered code, execution audits and
//! identifiers.
//!
//! This crate is **pure model** (no storage or runtime concerns).

pub mod artifact;
pub mod audit;
pub mod error;
pub mod id;

pub use artifact::{
    ArtifactRef, ArtifactStatus, CodeArtifact, ENTRY_POINT_KEY, Language, NewArtifact,
};
pub use audit::{AuditStatus, ExecutionAudit};
pub use error::{DomainError, DomainResult};
pub use id::{ArtifactId, AuditId, JobId};
