//! Postgres `NOTIFY` / `LISTEN` wake transport.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;

use codeflow_core::JobId;

use super::{WakeError, WakeSignal, WakeSource, WakeSubscription};

/// Sends `pg_notify(channel, job_id)`.
#[derive(Debug, Clone)]
pub struct PgWakeSignal {
    pool: PgPool,
    channel: String,
}

impl PgWakeSignal {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl WakeSignal for PgWakeSignal {
    async fn signal(&self, job: JobId) -> Result<(), WakeError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(job.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| WakeError::Publish(e.to_string()))?;
        Ok(())
    }
}

/// Opens a dedicated `LISTEN` connection per subscription.
#[derive(Debug, Clone)]
pub struct PgWakeSource {
    pool: PgPool,
    channel: String,
}

impl PgWakeSource {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl WakeSource for PgWakeSource {
    async fn subscribe(&self) -> Result<Box<dyn WakeSubscription>, WakeError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| WakeError::Connect(e.to_string()))?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|e| WakeError::Connect(e.to_string()))?;
        Ok(Box::new(PgWakeSubscription { listener }))
    }
}

struct PgWakeSubscription {
    listener: PgListener,
}

#[async_trait]
impl WakeSubscription for PgWakeSubscription {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>, WakeError> {
        // `try_recv` reports a dropped connection instead of silently reconnecting.
        match tokio::time::timeout(timeout, self.listener.try_recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(Some(notification))) => Ok(Some(notification.payload().to_string())),
            Ok(Ok(None)) => Err(WakeError::Closed),
            Ok(Err(e)) => Err(WakeError::Connect(e.to_string())),
        }
    }
}
