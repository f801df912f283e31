//! Execution adapters for submitted code.
//!
//! ## Variants
//!
//! - [`WasmAdapter`]: compiles WebAssembly text into an in-memory module,
//!   caches it by content, instantiates it and calls its entry export
//! - [`PythonAdapter`]: evaluates a script in a fresh interpreter namespace on
//!   every call (requires the `python` feature)
//!
//! Adapters are synchronous and CPU-bound; async callers should run them on a
//! blocking thread.

pub mod adapter;
pub mod cache;
pub mod detect;
pub mod error;
pub mod python;
pub mod wasm;

pub use adapter::{AdapterSet, ExecutionAdapter, RunRequest};
pub use cache::{CacheKey, CompiledUnitCache};
pub use error::ExecutionError;
pub use python::PythonAdapter;
pub use wasm::{WasmAdapter, DEFAULT_ENTRY};
