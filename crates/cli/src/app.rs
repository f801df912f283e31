//! Service wiring: Postgres when `DATABASE_URL` is set, in-memory otherwise.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use codeflow_infra::approval::ArtifactService;
use codeflow_infra::audit::{AuditLog, InMemoryAuditLog, PostgresAuditLog};
use codeflow_infra::config::AppConfig;
use codeflow_infra::db::{self, PgPool};
use codeflow_infra::jobs::{InMemoryJobQueue, JobQueue, PostgresJobQueue, QueueWorker};
use codeflow_infra::orchestrator::Orchestrator;
use codeflow_infra::publish::LoggingPublisher;
use codeflow_infra::registry::{CodeRegistry, InMemoryCodeRegistry, PostgresCodeRegistry};
use codeflow_infra::wake::{ListenerConfig, PgWakeSignal, PgWakeSource, WakeSignal, WakeSource};
use codeflow_runtime::AdapterSet;

pub struct Services {
    pub config: AppConfig,
    pub queue: Arc<dyn JobQueue>,
    pub orchestrator: Orchestrator,
    pub artifacts: ArtifactService,
    /// `None` in in-memory mode; the worker then relies on its interval.
    pub wake_source: Option<Arc<dyn WakeSource>>,
}

impl Services {
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        if config.database_url.is_some() {
            return Self::postgres(config).await;
        }
        warn!("DATABASE_URL not set; using process-local in-memory stores");
        Ok(Self::in_memory(config))
    }

    fn in_memory(config: AppConfig) -> Self {
        let registry: Arc<dyn CodeRegistry> = Arc::new(InMemoryCodeRegistry::new());
        let audits: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        Self::assemble(config, registry, audits, queue, None)
    }

    async fn postgres(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect(&config).await.context("connecting to Postgres")?;
        db::bootstrap_schema(&pool)
            .await
            .context("bootstrapping schema")?;

        let (signal, source) = wake_transport(&config, &pool)?;

        let registry: Arc<dyn CodeRegistry> = Arc::new(PostgresCodeRegistry::new(pool.clone()));
        let audits: Arc<dyn AuditLog> = Arc::new(PostgresAuditLog::new(pool.clone()));
        let queue: Arc<dyn JobQueue> = Arc::new(PostgresJobQueue::with_signal(pool, signal));
        info!(channel = %config.wake_channel, "using Postgres stores");
        Ok(Self::assemble(config, registry, audits, queue, Some(source)))
    }

    fn assemble(
        config: AppConfig,
        registry: Arc<dyn CodeRegistry>,
        audits: Arc<dyn AuditLog>,
        queue: Arc<dyn JobQueue>,
        wake_source: Option<Arc<dyn WakeSource>>,
    ) -> Self {
        let adapters = AdapterSet::default();
        let orchestrator = Orchestrator::new(registry.clone(), audits.clone(), adapters.clone());
        let artifacts = ArtifactService::new(registry, audits, queue.clone(), adapters)
            .with_base_url(config.base_url.clone());
        Self {
            config,
            queue,
            orchestrator,
            artifacts,
            wake_source,
        }
    }

    pub fn worker(&self) -> QueueWorker {
        QueueWorker::new(
            self.queue.clone(),
            self.orchestrator.clone(),
            Arc::new(LoggingPublisher::new(self.config.base_url.clone())),
        )
        .with_interval(self.config.tick_interval)
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            wait_timeout: self.config.wake_timeout,
            backoff: self.config.wake_backoff,
        }
    }
}

type WakeTransport = (Arc<dyn WakeSignal>, Arc<dyn WakeSource>);

#[cfg(feature = "redis")]
fn wake_transport(config: &AppConfig, pool: &PgPool) -> anyhow::Result<WakeTransport> {
    use codeflow_infra::wake::{RedisWakeSignal, RedisWakeSource};

    if let Some(url) = &config.redis_url {
        info!("using Redis wake channel");
        let signal = RedisWakeSignal::new(url, config.wake_channel.clone())
            .context("connecting Redis wake signal")?;
        let source = RedisWakeSource::new(url, config.wake_channel.clone())
            .context("connecting Redis wake source")?;
        return Ok((Arc::new(signal), Arc::new(source)));
    }
    Ok(postgres_transport(config, pool))
}

#[cfg(not(feature = "redis"))]
fn wake_transport(config: &AppConfig, pool: &PgPool) -> anyhow::Result<WakeTransport> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL is set but this build lacks the `redis` feature; using Postgres NOTIFY");
    }
    Ok(postgres_transport(config, pool))
}

fn postgres_transport(config: &AppConfig, pool: &PgPool) -> WakeTransport {
    (
        Arc::new(PgWakeSignal::new(pool.clone(), config.wake_channel.clone())),
        Arc::new(PgWakeSource::new(pool.clone(), config.wake_channel.clone())),
    )
}
