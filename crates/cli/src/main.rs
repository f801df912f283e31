use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::Value as JsonValue;
use tokio::sync::watch;

use codeflow_core::{ArtifactRef, AuditStatus, Language, NewArtifact};
use codeflow_infra::config::AppConfig;
use codeflow_infra::jobs::{JobKind, JobQueue, JobStatus};
use codeflow_infra::wake::run_listener;

mod app;

use app::Services;

#[derive(Parser, Debug)]
#[command(name = "codeflow", about = "Register, approve and run submitted code.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the queue worker and wake listener until Ctrl-C.
    Serve,
    /// Register a new artifact.
    Register(ArtifactArgs),
    /// Smoke-test, upsert and queue follow-up jobs.
    Approve(ArtifactArgs),
    Disable { name: String },
    Enable { name: String },
    /// Execute an artifact by id or name and print its audit.
    Exec {
        target: String,
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Queue a job.
    Enqueue {
        kind: String,
        target: String,
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Queue counts, or the jobs in one status.
    Jobs {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Audits of one artifact, newest first.
    Audits {
        target: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct ArtifactArgs {
    #[arg(long)]
    name: String,
    /// `compiled` (wat) or `scripted` (python).
    #[arg(long)]
    language: String,
    #[arg(long, conflicts_with = "file")]
    source: Option<String>,
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(long)]
    metadata: Option<String>,
    #[arg(long)]
    created_by: Option<String>,
}

impl ArtifactArgs {
    fn into_new(self) -> anyhow::Result<NewArtifact> {
        let language: Language = self.language.parse()?;
        let source = match (self.source, self.file) {
            (Some(source), _) => source,
            (None, Some(path)) => std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?,
            (None, None) => bail!("either --source or --file is required"),
        };
        let mut new = NewArtifact::new(self.name, language, source);
        if let Some(metadata) = self.metadata {
            new = new.with_metadata(parse_json("--metadata", &metadata)?);
        }
        if let Some(creator) = self.created_by {
            new = new.created_by(creator);
        }
        Ok(new)
    }
}

fn parse_json(flag: &str, raw: &str) -> anyhow::Result<JsonValue> {
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    codeflow_observability::init();
    let cli = Cli::parse();

    let services = Services::build(AppConfig::from_env()).await?;

    match cli.command {
        Command::Serve => serve(services).await?,
        Command::Register(args) => {
            let artifact = services.artifacts.register(args.into_new()?).await?;
            print_json(&artifact)?;
        }
        Command::Approve(args) => {
            let approval = services.artifacts.approve(args.into_new()?).await?;
            print_json(&approval)?;
        }
        Command::Disable { name } => print_json(&services.artifacts.disable(&name).await?)?,
        Command::Enable { name } => print_json(&services.artifacts.enable(&name).await?)?,
        Command::Exec { target, payload } => {
            let payload = parse_json("--payload", &payload)?;
            let audit = services
                .orchestrator
                .execute(&ArtifactRef::parse(&target), payload)
                .await?;
            print_json(&audit)?;
            if audit.status != AuditStatus::Succeeded {
                std::process::exit(1);
            }
        }
        Command::Enqueue {
            kind,
            target,
            payload,
        } => {
            let kind = JobKind::parse(&kind);
            if let JobKind::Unknown(other) = &kind {
                bail!("unknown job kind: {other}");
            }
            let id = services
                .queue
                .enqueue(kind, &target, parse_json("--payload", &payload)?)
                .await?;
            println!("{id}");
        }
        Command::Jobs { status, limit } => match status {
            Some(status) => {
                let status = JobStatus::parse(&status)
                    .with_context(|| format!("unknown job status: {status}"))?;
                print_json(&services.queue.list(Some(status), limit).await?)?;
            }
            None => print_json(&services.queue.stats().await?)?,
        },
        Command::Audits { target, limit } => {
            let audits = services
                .artifacts
                .list_audits(&ArtifactRef::parse(&target), limit)
                .await?;
            print_json(&audits)?;
        }
    }

    Ok(())
}

async fn serve(services: Services) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = services.worker();
    let wake = worker.wake_handle();
    let worker_task = tokio::spawn(worker.run(shutdown_rx.clone()));

    let listener_task = services.wake_source.clone().map(|source| {
        tokio::spawn(run_listener(
            source,
            Arc::clone(&services.queue),
            wake,
            services.listener_config(),
            shutdown_rx,
        ))
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    worker_task.await.context("queue worker task")?;
    if let Some(task) = listener_task {
        task.await.context("wake listener task")?;
    }
    Ok(())
}
