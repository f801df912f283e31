//! Compile-and-run adapter for WebAssembly text.
//!
//! Entry convention: the module instantiates with no imports (its `start`
//! function, if any, acts as the constructor) and exports a parameterless
//! function, `run` unless the artifact names another entry.

use std::sync::Arc;

use tracing::debug;
use wasmtime::{Engine, Instance, Module, Store};

use codeflow_core::Language;

use crate::adapter::{ExecutionAdapter, RunRequest};
use crate::cache::{CacheKey, CompiledUnitCache};
use crate::detect;
use crate::error::ExecutionError;

/// Export called when the artifact does not name one.
pub const DEFAULT_ENTRY: &str = "run";

#[derive(Clone)]
pub struct WasmAdapter {
    engine: Engine,
    cache: Arc<CompiledUnitCache<Module>>,
}

impl WasmAdapter {
    pub fn new() -> Self {
        Self::with_cache(Arc::new(CompiledUnitCache::new()))
    }

    pub fn with_cache(cache: Arc<CompiledUnitCache<Module>>) -> Self {
        Self {
            engine: Engine::default(),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<CompiledUnitCache<Module>> {
        &self.cache
    }

    /// Compile `source` (or reuse the cached unit) for artifact `artifact`.
    pub fn compile(&self, artifact: &str, source: &str) -> Result<Module, ExecutionError> {
        let prepared = detect::prepare(source, artifact);
        let key = CacheKey::new(artifact, prepared.unit_name.as_str(), &prepared.normalized);

        self.cache.get_or_compile(key, || {
            debug!(artifact, unit = %prepared.unit_name, "compiling unit");
            Module::new(&self.engine, prepared.normalized.as_bytes())
                .map_err(|e| ExecutionError::compile(diagnostics(&e)))
        })
    }

    /// Instantiate `module` and call its entry export.
    pub fn invoke(&self, module: &Module, entry: &str) -> Result<(), ExecutionError> {
        let mut store = Store::new(&self.engine, ());

        let instance = Instance::new(&mut store, module, &[]).map_err(|e| {
            ExecutionError::runtime(format!("instantiation failed: {}", diagnostics(&e)))
        })?;

        let func = instance
            .get_typed_func::<(), ()>(&mut store, entry)
            .map_err(|e| ExecutionError::runtime(format!("entry `{entry}` unavailable: {e}")))?;

        func.call(&mut store, ())
            .map_err(|e| ExecutionError::runtime(format!("`{entry}` trapped: {}", diagnostics(&e))))
    }
}

impl Default for WasmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionAdapter for WasmAdapter {
    fn language(&self) -> Language {
        Language::Compiled
    }

    fn run(&self, request: &RunRequest<'_>) -> Result<(), ExecutionError> {
        let module = self.compile(request.unit_name, request.source)?;
        self.invoke(&module, request.entry_point.unwrap_or(DEFAULT_ENTRY))
    }

    fn prepare(&self, request: &RunRequest<'_>) -> Result<(), ExecutionError> {
        self.compile(request.unit_name, request.source).map(|_| ())
    }

    fn invalidate(&self, name: &str) -> usize {
        self.cache.invalidate(name)
    }
}

/// Every message in the error chain, one per line.
fn diagnostics(err: &wasmtime::Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
