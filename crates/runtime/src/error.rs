use thiserror::Error;

/// Failure while preparing or running submitted code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// All compiler diagnostics, joined.
    #[error("compilation failed: {0}")]
    Compile(String),

    /// Instantiation, missing entry point, trap or script exception.
    #[error("execution failed: {0}")]
    Runtime(String),

    /// The interpreter for this language is not available in this build.
    #[error("interpreter engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
}

impl ExecutionError {
    pub fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Configuration problems that retrying cannot fix.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            ExecutionError::EngineUnavailable(_) | ExecutionError::UnsupportedLanguage(_)
        )
    }
}
