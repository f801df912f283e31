//! Queue worker: one claim in flight per process.
//!
//! Each tick claims the oldest queued job, dispatches it by kind and records
//! `done` or `error`. A failing job never stops the loop. A dispatch that
//! panics records the job as `error`, and a tick that panics is logged and
//! followed by the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use codeflow_core::{ArtifactRef, AuditStatus, JobId};

use super::store::JobQueue;
use super::types::{Job, JobKind};
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::publish::{PublishError, Publisher};

/// Why a claimed job ended in `error`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobDispatchError {
    #[error("unknown job kind: {0}")]
    UnknownKind(String),
    #[error("{0}")]
    ExecutionFailed(String),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("job dispatch panicked: {0}")]
    Panicked(String),
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Done(JobId),
    Failed(JobId, String),
}

#[derive(Clone)]
pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    orchestrator: Orchestrator,
    publisher: Arc<dyn Publisher>,
    wake: Arc<Notify>,
    interval: Duration,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        orchestrator: Orchestrator,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            publisher,
            wake: Arc::new(Notify::new()),
            interval: Duration::from_secs(2),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Handle the wake listener pokes to run the next tick early.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Run one claim-dispatch-record cycle.
    pub async fn tick(&self) -> TickOutcome {
        let job = match self.queue.claim_next().await {
            Ok(Some(job)) => job,
            Ok(None) => return TickOutcome::Idle,
            Err(e) => {
                // Contention or a storage hiccup; the next tick retries.
                warn!(error = %e, "claim failed");
                return TickOutcome::Idle;
            }
        };

        info!(job_id = %job.id, kind = %job.kind, target = %job.target_name, attempts = job.attempts, "processing job");

        // Dispatch in its own task so a panic still lands the job in `error`.
        let worker = self.clone();
        let claimed = job.clone();
        let dispatched = tokio::spawn(async move { worker.dispatch(&claimed).await })
            .await
            .unwrap_or_else(|e| Err(JobDispatchError::Panicked(e.to_string())));

        match dispatched {
            Ok(()) => {
                if let Err(e) = self.queue.mark_done(job.id).await {
                    error!(job_id = %job.id, error = %e, "failed to mark job done");
                }
                TickOutcome::Done(job.id)
            }
            Err(e) => {
                let message = e.to_string();
                error!(job_id = %job.id, kind = %job.kind, error = %message, "job failed");
                if let Err(e) = self.queue.mark_error(job.id, &message).await {
                    error!(job_id = %job.id, error = %e, "failed to mark job error");
                }
                TickOutcome::Failed(job.id, message)
            }
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind))]
    async fn dispatch(&self, job: &Job) -> Result<(), JobDispatchError> {
        match &job.kind {
            JobKind::Compile | JobKind::Execute => {
                let reference = ArtifactRef::Name(job.target_name.clone());
                let audit = self
                    .orchestrator
                    .execute(&reference, job.payload.clone())
                    .await?;
                if audit.status == AuditStatus::Succeeded {
                    Ok(())
                } else {
                    Err(JobDispatchError::ExecutionFailed(
                        audit.error.unwrap_or_else(|| format!("audit {} ended {}", audit.id, audit.status)),
                    ))
                }
            }
            JobKind::Publish if job.is_tick() => Ok(()),
            JobKind::Publish => {
                self.publisher.publish(&job.target_name).await?;
                Ok(())
            }
            JobKind::Unknown(kind) => Err(JobDispatchError::UnknownKind(kind.clone())),
        }
    }

    /// Tick on the interval and on every wake until `shutdown` flips to
    /// `true`. Ticks never overlap.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = self.interval.as_millis() as u64, "queue worker started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            // Drain while there is work; each job runs in its own task so a
            // panic is contained.
            loop {
                let worker = self.clone();
                match tokio::spawn(async move { worker.tick().await }).await {
                    Ok(TickOutcome::Idle) => break,
                    Ok(_) => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "queue tick aborted");
                        break;
                    }
                }
            }
        }

        info!("queue worker stopped");
    }
}

impl std::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use codeflow_core::{Language, NewArtifact};
    use codeflow_runtime::AdapterSet;
    use serde_json::json;

    use crate::audit::InMemoryAuditLog;
    use crate::jobs::{InMemoryJobQueue, JobStatus};
    use crate::registry::{CodeRegistry, InMemoryCodeRegistry};

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, target: &str) -> Result<String, PublishError> {
            self.published.lock().unwrap().push(target.to_string());
            Ok(format!("publish-{target}"))
        }
    }

    struct PanickingPublisher;

    #[async_trait]
    impl Publisher for PanickingPublisher {
        async fn publish(&self, target: &str) -> Result<String, PublishError> {
            panic!("publisher exploded on {target}");
        }
    }

    struct Fixture {
        worker: QueueWorker,
        queue: Arc<InMemoryJobQueue>,
        registry: Arc<InMemoryCodeRegistry>,
        publisher: Arc<RecordingPublisher>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(InMemoryCodeRegistry::new());
        let audits = Arc::new(InMemoryAuditLog::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let orchestrator = Orchestrator::new(registry.clone(), audits, AdapterSet::default());
        let worker = QueueWorker::new(queue.clone(), orchestrator, publisher.clone());
        Fixture {
            worker,
            queue,
            registry,
            publisher,
        }
    }

    #[tokio::test]
    async fn idle_when_queue_is_empty() {
        let f = fixture();
        assert_eq!(f.worker.tick().await, TickOutcome::Idle);
    }

    #[tokio::test]
    async fn execute_job_runs_artifact() {
        let f = fixture();
        f.registry
            .insert(NewArtifact::new("Demo", Language::Compiled, r#"(module (func (export "run")))"#))
            .await
            .unwrap();
        let id = f.queue.enqueue(JobKind::Execute, "Demo", json!({})).await.unwrap();

        assert_eq!(f.worker.tick().await, TickOutcome::Done(id));
        let job = f.queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn failing_artifact_marks_job_error() {
        let f = fixture();
        f.registry
            .insert(NewArtifact::new("Broken", Language::Compiled, "(module (func (export \"run\") (i32.add)))"))
            .await
            .unwrap();
        let id = f.queue.enqueue(JobKind::Compile, "Broken", json!({})).await.unwrap();

        let outcome = f.worker.tick().await;
        assert!(matches!(outcome, TickOutcome::Failed(job, msg) if job == id && msg.starts_with("compilation failed")));
        assert_eq!(f.queue.get(id).await.unwrap().unwrap().status, JobStatus::Error);
    }

    #[tokio::test]
    async fn missing_artifact_marks_job_error() {
        let f = fixture();
        let id = f.queue.enqueue(JobKind::Execute, "Ghost", json!({})).await.unwrap();
        assert!(matches!(f.worker.tick().await, TickOutcome::Failed(job, _) if job == id));
    }

    #[tokio::test]
    async fn publish_calls_collaborator_but_ticks_do_not() {
        let f = fixture();
        f.queue.enqueue(JobKind::Publish, "Demo", json!({})).await.unwrap();
        f.queue.enqueue_tick().await.unwrap();

        assert!(matches!(f.worker.tick().await, TickOutcome::Done(_)));
        assert!(matches!(f.worker.tick().await, TickOutcome::Done(_)));
        assert_eq!(*f.publisher.published.lock().unwrap(), vec!["Demo".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_drains_queue_and_stops() {
        let f = fixture();
        f.queue.enqueue(JobKind::Publish, "A", json!({})).await.unwrap();
        f.queue.enqueue(JobKind::Publish, "B", json!({})).await.unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(f.worker.clone().run(stop_rx));

        tokio::time::sleep(Duration::from_secs(3)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(f.queue.stats().await.unwrap().done, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_dispatch_marks_job_error_and_loop_continues() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryCodeRegistry::new()),
            Arc::new(InMemoryAuditLog::new()),
            AdapterSet::default(),
        );
        let worker = QueueWorker::new(queue.clone(), orchestrator, Arc::new(PanickingPublisher));

        let doomed = queue.enqueue(JobKind::Publish, "Demo", json!({})).await.unwrap();
        let next = queue.enqueue_tick().await.unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(stop_rx));
        tokio::time::sleep(Duration::from_secs(10)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let doomed = queue.get(doomed).await.unwrap().unwrap();
        assert_eq!(doomed.status, JobStatus::Error);
        assert!(doomed
            .error
            .unwrap_or_default()
            .starts_with("job dispatch panicked"));
        assert_eq!(queue.get(next).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn panicking_dispatch_is_reported_by_tick() {
        let f = fixture();
        let worker = QueueWorker::new(
            f.queue.clone(),
            Orchestrator::new(
                f.registry.clone(),
                Arc::new(InMemoryAuditLog::new()),
                AdapterSet::default(),
            ),
            Arc::new(PanickingPublisher),
        );
        let id = f.queue.enqueue(JobKind::Publish, "Demo", json!({})).await.unwrap();

        let outcome = worker.tick().await;
        assert!(matches!(outcome, TickOutcome::Failed(job, msg) if job == id && msg.contains("panicked")));
        assert_eq!(f.queue.stats().await.unwrap().running, 0);
    }
}
