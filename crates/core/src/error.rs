//! Domain error model.

use thiserror::Error;

/// Result type used across the model layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Model-level error.
///
/// Keep this focused on deterministic failures (validation, lifecycle
/// transitions, identifiers). Storage and runtime concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. missing registration field).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A lifecycle transition was not allowed from the current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A language tag is not one of the supported languages.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
