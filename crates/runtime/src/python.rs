//! Script adapter backed by an embedded CPython interpreter.
//!
//! Every call evaluates the script in a fresh globals namespace; nothing is
//! cached between runs. The call payload is bound to the global `payload`.
//! Scripts run in-process with the host's privileges.

use codeflow_core::Language;

use crate::adapter::{ExecutionAdapter, RunRequest};
use crate::error::ExecutionError;

#[derive(Debug, Clone, Copy, Default)]
pub struct PythonAdapter;

impl PythonAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Whether this build carries an interpreter.
    pub fn is_available() -> bool {
        cfg!(feature = "python")
    }
}

impl ExecutionAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Scripted
    }

    fn run(&self, request: &RunRequest<'_>) -> Result<(), ExecutionError> {
        engine::eval(request)
    }
}

#[cfg(feature = "python")]
mod engine {
    use std::ffi::CString;

    use pyo3::prelude::*;
    use pyo3::types::PyDict;
    use tracing::debug;

    use super::*;

    pub(super) fn eval(request: &RunRequest<'_>) -> Result<(), ExecutionError> {
        let code = CString::new(request.source)
            .map_err(|_| ExecutionError::runtime("script contains a NUL byte"))?;
        let payload = serde_json::to_string(request.payload)
            .map_err(|e| ExecutionError::runtime(format!("payload is not serializable: {e}")))?;

        debug!(unit = request.unit_name, "evaluating script");

        Python::attach(|py| -> PyResult<()> {
            let globals = PyDict::new(py);
            let value = py.import("json")?.call_method1("loads", (payload,))?;
            globals.set_item("payload", value)?;
            py.run(code.as_c_str(), Some(&globals), None)
        })
        .map_err(|e| ExecutionError::runtime(e.to_string()))
    }
}

#[cfg(not(feature = "python"))]
mod engine {
    use super::*;

    pub(super) fn eval(_request: &RunRequest<'_>) -> Result<(), ExecutionError> {
        Err(ExecutionError::EngineUnavailable(
            "built without the `python` feature".to_string(),
        ))
    }
}
