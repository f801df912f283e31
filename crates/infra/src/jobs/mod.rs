//! Durable job queue and its worker.
//!
//! Jobs are named units of deferred work (`compile`, `publish`, `execute`)
//! against a registered artifact. They are claimed oldest-first, each by at
//! most one worker, and end in `done` or `error`. There is no automatic
//! retry; `attempts` records how often a job was claimed.

pub mod postgres;
pub mod store;
pub mod types;
pub mod worker;

pub use postgres::PostgresJobQueue;
pub use store::{InMemoryJobQueue, JobQueue, JobStoreError};
pub use types::{Job, JobKind, JobStats, JobStatus, TICK_TARGET};
pub use worker::{JobDispatchError, QueueWorker, TickOutcome};
