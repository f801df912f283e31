//! Job queue abstraction and in-memory implementation.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use codeflow_core::JobId;

use super::types::{Job, JobKind, JobStats, JobStatus};
use crate::wake::{NoopWakeSignal, WakeSignal};

/// Durable work queue.
///
/// `claim_next` hands each queued job to at most one caller, oldest first.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Insert a queued job and fire a best-effort wake signal.
    async fn enqueue(
        &self,
        kind: JobKind,
        target_name: &str,
        payload: JsonValue,
    ) -> Result<JobId, JobStoreError>;

    /// Insert a tick job without signalling.
    async fn enqueue_tick(&self) -> Result<JobId, JobStoreError>;

    /// Claim the oldest queued job: `running`, attempts + 1.
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError>;

    async fn mark_done(&self, id: JobId) -> Result<(), JobStoreError>;

    async fn mark_error(&self, id: JobId, message: &str) -> Result<(), JobStoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Jobs in enqueue order, optionally filtered by status.
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {0} is not running")]
    NotRunning(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("corrupt job row: {0}")]
    Decode(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Fire the wake signal for `job`, logging instead of failing.
pub(crate) async fn signal_best_effort(signal: &dyn WakeSignal, job: JobId) {
    if let Err(e) = signal.signal(job).await {
        warn!(job_id = %job, error = %e, "wake signal failed; polling will pick the job up");
    }
}

/// In-memory job queue for tests/dev.
pub struct InMemoryJobQueue {
    /// Enqueue order.
    jobs: Mutex<Vec<Job>>,
    signal: Arc<dyn WakeSignal>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::with_signal(Arc::new(NoopWakeSignal))
    }

    pub fn with_signal(signal: Arc<dyn WakeSignal>) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            signal,
        }
    }

    fn insert(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.push(job);
        Ok(id)
    }

    fn finish(&self, id: JobId, apply: impl FnOnce(&mut Job)) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(JobStoreError::NotFound(id))?;
        if job.status != JobStatus::Running {
            return Err(JobStoreError::NotRunning(id));
        }
        apply(job);
        Ok(())
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("InMemoryJobQueue").field("jobs", &len).finish()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        kind: JobKind,
        target_name: &str,
        payload: JsonValue,
    ) -> Result<JobId, JobStoreError> {
        let id = self.insert(Job::new(kind, target_name, payload))?;
        signal_best_effort(self.signal.as_ref(), id).await;
        Ok(id)
    }

    async fn enqueue_tick(&self) -> Result<JobId, JobStoreError> {
        self.insert(Job::tick())
    }

    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        // The mutex makes select-and-mark one atomic step.
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(job) = jobs.iter_mut().find(|j| j.status == JobStatus::Queued) else {
            return Ok(None);
        };
        job.mark_running();
        debug!(job_id = %job.id, kind = %job.kind, "job claimed");
        Ok(Some(job.clone()))
    }

    async fn mark_done(&self, id: JobId) -> Result<(), JobStoreError> {
        self.finish(id, Job::mark_done)
    }

    async fn mark_error(&self, id: JobId, message: &str) -> Result<(), JobStoreError> {
        self.finish(id, |job| job.mark_error(message))
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(jobs
            .iter()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats = JobStats::default();
        for job in jobs.iter() {
            stats.record(job.status);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::wake::WakeError;

    #[derive(Default)]
    struct CountingSignal {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl WakeSignal for CountingSignal {
        async fn signal(&self, _job: JobId) -> Result<(), WakeError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(WakeError::Publish("down".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueue_and_claim() {
        let queue = InMemoryJobQueue::new();
        let id = queue
            .enqueue(JobKind::Execute, "X", json!({"p": 1}))
            .await
            .unwrap();

        let claimed = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.kind, JobKind::Execute);
        assert_eq!(claimed.target_name, "X");
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);

        // No more jobs
        assert!(queue.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_oldest_first() {
        let queue = InMemoryJobQueue::new();
        let first = queue.enqueue(JobKind::Compile, "A", json!({})).await.unwrap();
        let second = queue.enqueue(JobKind::Publish, "B", json!({})).await.unwrap();

        assert_eq!(queue.claim_next().await.unwrap().unwrap().id, first);
        assert_eq!(queue.claim_next().await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn terminal_marks_require_running() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue(JobKind::Compile, "A", json!({})).await.unwrap();
        assert!(matches!(
            queue.mark_done(id).await,
            Err(JobStoreError::NotRunning(_))
        ));

        queue.claim_next().await.unwrap();
        queue.mark_error(id, "boom").await.unwrap();
        assert!(queue.mark_done(id).await.is_err());

        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn enqueue_signals_but_ticks_do_not() {
        let signal = Arc::new(CountingSignal::default());
        let queue = InMemoryJobQueue::with_signal(signal.clone());

        queue.enqueue(JobKind::Compile, "A", json!({})).await.unwrap();
        queue.enqueue_tick().await.unwrap();

        assert_eq!(signal.sent.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().await.unwrap().queued, 2);
    }

    #[tokio::test]
    async fn failed_signal_does_not_fail_enqueue() {
        let signal = Arc::new(CountingSignal {
            fail: true,
            ..Default::default()
        });
        let queue = InMemoryJobQueue::with_signal(signal);
        assert!(queue.enqueue(JobKind::Compile, "A", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn stats_tracking() {
        let queue = InMemoryJobQueue::new();
        for i in 0..5 {
            queue.enqueue(JobKind::Execute, "X", json!({"i": i})).await.unwrap();
        }

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.queued, 5);

        let a = queue.claim_next().await.unwrap().unwrap();
        queue.claim_next().await.unwrap();
        queue.mark_done(a.id).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.queued, 3);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.done, 1);

        let running = queue.list(Some(JobStatus::Running), 10).await.unwrap();
        assert_eq!(running.len(), 1);
    }
}
