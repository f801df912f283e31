//! Core job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use codeflow_core::JobId;

/// Target of the no-op publish job the wake listener enqueues.
pub const TICK_TARGET: &str = "_wake_tick_";

/// Job kind for routing.
///
/// Kinds read back from storage that this build does not know are kept as
/// `Unknown` so the worker can fail them explicitly. Every kind serializes as
/// its bare tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum JobKind {
    /// Load the artifact and run it once (warms the compiled-unit cache).
    Compile,
    /// Hand the artifact to the publish collaborator.
    Publish,
    /// Load the artifact and run it with the job payload.
    Execute,
    Unknown(String),
}

impl JobKind {
    pub fn as_str(&self) -> &str {
        match self {
            JobKind::Compile => "compile",
            JobKind::Publish => "publish",
            JobKind::Execute => "execute",
            JobKind::Unknown(kind) => kind,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "compile" => JobKind::Compile,
            "publish" => JobKind::Publish,
            "execute" => JobKind::Execute,
            _ => JobKind::Unknown(s.to_string()),
        }
    }
}

impl From<JobKind> for String {
    fn from(kind: JobKind) -> Self {
        match kind {
            JobKind::Unknown(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl From<String> for JobKind {
    fn from(s: String) -> Self {
        JobKind::parse(&s)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job execution status: `queued -> running -> {done, error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed
    Queued,
    /// Claimed by a worker
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Artifact name the job acts on (loosely coupled, not a foreign key).
    pub target_name: String,
    pub payload: JsonValue,
    pub status: JobStatus,
    /// Incremented on every claim.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    /// New job in `queued`. A null payload becomes `{}`.
    pub fn new(kind: JobKind, target_name: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: JobId::new(),
            kind,
            target_name: target_name.into(),
            payload: if payload.is_null() {
                JsonValue::Object(Default::default())
            } else {
                payload
            },
            status: JobStatus::Queued,
            attempts: 0,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// The no-op publish job used to nudge the worker.
    pub fn tick() -> Self {
        Self::new(JobKind::Publish, TICK_TARGET, JsonValue::Null)
    }

    pub fn is_tick(&self) -> bool {
        self.kind == JobKind::Publish && self.target_name == TICK_TARGET
    }

    /// Mark job as claimed.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_done(&mut self) {
        self.status = JobStatus::Done;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_error(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Error;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub queued: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Done => self.done += 1,
            JobStatus::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.running + self.done + self.error
    }
}
