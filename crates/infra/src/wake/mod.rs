//! Wake channel: a best-effort signal that new jobs are queued.
//!
//! The publisher side (`WakeSignal`) is fired by `JobQueue::enqueue`; a failed
//! signal is logged and ignored, the worker's polling tick still finds the
//! job. The listener side (`run_listener`) subscribes through a `WakeSource`,
//! and on every notification enqueues a tick job and pokes the in-process
//! worker. It never touches queue state beyond that insert.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use codeflow_core::JobId;

use crate::jobs::JobQueue;

pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

pub use postgres::{PgWakeSignal, PgWakeSource};
#[cfg(feature = "redis")]
pub use self::redis::{RedisWakeSignal, RedisWakeSource};

#[derive(Debug, Clone, thiserror::Error)]
pub enum WakeError {
    #[error("wake channel connection failed: {0}")]
    Connect(String),
    #[error("wake channel closed")]
    Closed,
    #[error("wake signal failed: {0}")]
    Publish(String),
}

/// Publisher side.
#[async_trait]
pub trait WakeSignal: Send + Sync {
    async fn signal(&self, job: JobId) -> Result<(), WakeError>;
}

/// Signal that goes nowhere, for in-memory deployments and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWakeSignal;

#[async_trait]
impl WakeSignal for NoopWakeSignal {
    async fn signal(&self, _job: JobId) -> Result<(), WakeError> {
        Ok(())
    }
}

/// One live subscription.
#[async_trait]
pub trait WakeSubscription: Send {
    /// Wait up to `timeout` for a notification. `Ok(None)` means the wait
    /// timed out; an error means the subscription is dead.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>, WakeError>;
}

/// Listener side: opens subscriptions.
#[async_trait]
pub trait WakeSource: Send + Sync {
    async fn subscribe(&self) -> Result<Box<dyn WakeSubscription>, WakeError>;
}

/// Listener loop timing.
#[derive(Debug, Clone, Copy)]
pub struct ListenerConfig {
    pub wait_timeout: Duration,
    pub backoff: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(5),
            backoff: Duration::from_secs(2),
        }
    }
}

/// Subscribe, wait, react, and resubscribe after failures until `shutdown`
/// flips to `true`.
pub async fn run_listener(
    source: Arc<dyn WakeSource>,
    queue: Arc<dyn JobQueue>,
    worker: Arc<Notify>,
    config: ListenerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("wake listener started");

    'subscribe: while !*shutdown.borrow() {
        let mut subscription = match source.subscribe().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, backoff_ms = config.backoff.as_millis() as u64, "wake subscribe failed, retrying");
                if sleep_or_shutdown(config.backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        loop {
            let received = tokio::select! {
                r = subscription.recv(config.wait_timeout) => r,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break 'subscribe;
                    }
                    continue;
                }
            };

            match received {
                Ok(None) => {}
                Ok(Some(payload)) => {
                    debug!(%payload, "wake notification received");
                    if let Err(e) = queue.enqueue_tick().await {
                        warn!(error = %e, "failed to enqueue wake tick");
                    }
                    worker.notify_one();
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = config.backoff.as_millis() as u64, "wake listener error, resubscribing");
                    if sleep_or_shutdown(config.backoff, &mut shutdown).await {
                        break 'subscribe;
                    }
                    continue 'subscribe;
                }
            }
        }
    }

    info!("wake listener stopped");
}

/// Returns `true` when shutdown was requested during the sleep.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::jobs::{InMemoryJobQueue, JobStatus};

    /// Source whose first subscription fails, then replays scripted events.
    struct ScriptedSource {
        attempts: AtomicUsize,
        events: Mutex<VecDeque<Result<Option<String>, WakeError>>>,
    }

    struct ScriptedSubscription {
        events: Vec<Result<Option<String>, WakeError>>,
    }

    #[async_trait]
    impl WakeSubscription for ScriptedSubscription {
        async fn recv(&mut self, timeout: Duration) -> Result<Option<String>, WakeError> {
            if self.events.is_empty() {
                tokio::time::sleep(timeout).await;
                return Ok(None);
            }
            self.events.remove(0)
        }
    }

    #[async_trait]
    impl WakeSource for ScriptedSource {
        async fn subscribe(&self) -> Result<Box<dyn WakeSubscription>, WakeError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(WakeError::Connect("refused".into()));
            }
            let events = self.events.lock().unwrap().drain(..).collect();
            Ok(Box::new(ScriptedSubscription { events }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_enqueue_ticks_and_survive_errors() {
        let source = Arc::new(ScriptedSource {
            attempts: AtomicUsize::new(0),
            events: Mutex::new(VecDeque::from(vec![
                Ok(Some("job".to_string())),
                Ok(None),
                Err(WakeError::Closed),
            ])),
        });
        let queue = Arc::new(InMemoryJobQueue::new());
        let worker = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(run_listener(
            source.clone(),
            queue.clone(),
            worker.clone(),
            ListenerConfig::default(),
            stop_rx,
        ));

        // First subscribe fails, backoff 2s, then one notification arrives.
        worker.notified().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(source.attempts.load(Ordering::SeqCst) >= 3);
        let queued = queue.list(Some(JobStatus::Queued), 10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert!(queued[0].is_tick());
    }

    #[tokio::test]
    async fn noop_signal_always_succeeds() {
        assert!(NoopWakeSignal.signal(JobId::new()).await.is_ok());
    }
}
