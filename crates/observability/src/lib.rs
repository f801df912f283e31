//! Process-wide log setup shared by every binary.

pub mod tracing;

pub use self::tracing::{LOG_FORMAT_ENV, LogFormat};

/// Install the global subscriber; format from `CODEFLOW_LOG_FORMAT`.
///
/// Later calls are no-ops.
pub fn init() {
    self::tracing::init();
}
