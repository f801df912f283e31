//! Adapter capability and per-language dispatch.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use codeflow_core::Language;

use crate::error::ExecutionError;
use crate::python::PythonAdapter;
use crate::wasm::WasmAdapter;

/// One invocation of submitted code.
#[derive(Debug, Clone, Copy)]
pub struct RunRequest<'a> {
    /// Artifact name; used as cache label and detection fallback.
    pub unit_name: &'a str,
    pub source: &'a str,
    /// Explicit entry export; adapters pick their default when `None`.
    pub entry_point: Option<&'a str>,
    pub payload: &'a JsonValue,
}

/// Capability: run a piece of source under the language's entry convention.
pub trait ExecutionAdapter: Send + Sync {
    fn language(&self) -> Language;

    fn run(&self, request: &RunRequest<'_>) -> Result<(), ExecutionError>;

    /// Compile without running, where the language has a compile step.
    fn prepare(&self, _request: &RunRequest<'_>) -> Result<(), ExecutionError> {
        Ok(())
    }

    /// Forget anything cached for `name`.
    fn invalidate(&self, _name: &str) -> usize {
        0
    }
}

/// The adapter for each supported language.
#[derive(Clone)]
pub struct AdapterSet {
    compiled: Arc<dyn ExecutionAdapter>,
    scripted: Arc<dyn ExecutionAdapter>,
}

impl AdapterSet {
    pub fn new(compiled: Arc<dyn ExecutionAdapter>, scripted: Arc<dyn ExecutionAdapter>) -> Self {
        Self { compiled, scripted }
    }

    pub fn for_language(&self, language: Language) -> &Arc<dyn ExecutionAdapter> {
        match language {
            Language::Compiled => &self.compiled,
            Language::Scripted => &self.scripted,
        }
    }

    /// Drop cached units for `name` in every adapter.
    pub fn invalidate(&self, name: &str) -> usize {
        self.compiled.invalidate(name) + self.scripted.invalidate(name)
    }
}

impl Default for AdapterSet {
    fn default() -> Self {
        Self::new(Arc::new(WasmAdapter::new()), Arc::new(PythonAdapter::new()))
    }
}

impl core::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdapterSet")
            .field("compiled", &self.compiled.language())
            .field("scripted", &self.scripted.language())
            .finish()
    }
}
