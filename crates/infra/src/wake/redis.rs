//! Redis pub/sub wake transport (optional).
//!
//! Redis pub/sub drops messages while nobody listens, which is fine for a
//! wake signal: the polling tick is the fallback.

use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use redis::Commands;
use tokio::sync::mpsc;

use codeflow_core::JobId;

use super::{WakeError, WakeSignal, WakeSource, WakeSubscription};

#[derive(Debug, Clone)]
pub struct RedisWakeSignal {
    client: redis::Client,
    channel: String,
}

impl RedisWakeSignal {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, WakeError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| WakeError::Connect(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl WakeSignal for RedisWakeSignal {
    async fn signal(&self, job: JobId) -> Result<(), WakeError> {
        let client = self.client.clone();
        let channel = self.channel.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = client
                .get_connection()
                .map_err(|e| WakeError::Publish(e.to_string()))?;
            let _: i64 = conn
                .publish(&channel, job.to_string())
                .map_err(|e| WakeError::Publish(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| WakeError::Publish(e.to_string()))?
    }
}

#[derive(Debug, Clone)]
pub struct RedisWakeSource {
    client: redis::Client,
    channel: String,
}

impl RedisWakeSource {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, WakeError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| WakeError::Connect(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }
}

#[async_trait]
impl WakeSource for RedisWakeSource {
    async fn subscribe(&self) -> Result<Box<dyn WakeSubscription>, WakeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        let client = self.client.clone();
        let channel = self.channel.clone();

        // Background thread that receives pub/sub messages and forwards them.
        // It exits on any connection error, which closes `rx`.
        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(WakeError::Connect(e.to_string())));
                    return;
                }
            };

            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                let _ = ready_tx.send(Err(WakeError::Connect(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(_) => return,
                };

                let payload: String = msg.get_payload().unwrap_or_default();
                if tx.send(payload).is_err() {
                    return;
                }
            }
        });

        ready_rx.await.map_err(|_| WakeError::Closed)??;
        Ok(Box::new(RedisWakeSubscription { rx }))
    }
}

struct RedisWakeSubscription {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl WakeSubscription for RedisWakeSubscription {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>, WakeError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Some(payload)) => Ok(Some(payload)),
            Ok(None) => Err(WakeError::Closed),
        }
    }
}
