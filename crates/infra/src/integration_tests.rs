//! Scenario tests across registry, audit log, queue, worker and adapters.
//!
//! All in-memory; the Postgres variants live in `tests/postgres.rs`.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use codeflow_core::{ArtifactRef, AuditStatus, JobId, Language, NewArtifact};
use codeflow_runtime::{AdapterSet, PythonAdapter, WasmAdapter};

use crate::approval::ArtifactService;
use crate::audit::{AuditLog, InMemoryAuditLog};
use crate::jobs::{InMemoryJobQueue, JobKind, JobQueue, JobStatus, QueueWorker, TickOutcome};
use crate::orchestrator::Orchestrator;
use crate::publish::LoggingPublisher;
use crate::registry::{CodeRegistry, InMemoryCodeRegistry};

const DEMO: &str = r#"(module $Demo (func (export "run")))"#;
const BROKEN: &str = r#"(module $Broken (func (export "run") (i32.add)))"#;
const TRAPPING_DEMO: &str = r#"(module $Demo (func (export "run") unreachable))"#;

struct Stack {
    wasm: WasmAdapter,
    registry: Arc<InMemoryCodeRegistry>,
    audits: Arc<InMemoryAuditLog>,
    queue: Arc<InMemoryJobQueue>,
    orchestrator: Orchestrator,
    worker: QueueWorker,
    service: ArtifactService,
}

fn stack() -> Stack {
    let wasm = WasmAdapter::new();
    let adapters = AdapterSet::new(Arc::new(wasm.clone()), Arc::new(PythonAdapter::new()));
    let registry = Arc::new(InMemoryCodeRegistry::new());
    let audits = Arc::new(InMemoryAuditLog::new());
    let queue = Arc::new(InMemoryJobQueue::new());

    let orchestrator = Orchestrator::new(registry.clone(), audits.clone(), adapters.clone());
    let worker = QueueWorker::new(
        queue.clone(),
        orchestrator.clone(),
        Arc::new(LoggingPublisher::new("http://localhost:8080")),
    );
    let service = ArtifactService::new(registry.clone(), audits.clone(), queue.clone(), adapters);

    Stack {
        wasm,
        registry,
        audits,
        queue,
        orchestrator,
        worker,
        service,
    }
}

#[tokio::test]
async fn demo_succeeds_and_broken_fails_with_diagnostics() {
    let s = stack();
    let demo = s
        .registry
        .insert(NewArtifact::new("Demo", Language::Compiled, DEMO))
        .await
        .unwrap();
    let broken = s
        .registry
        .insert(NewArtifact::new("Broken", Language::Compiled, BROKEN))
        .await
        .unwrap();

    let ok = s
        .orchestrator
        .execute(&ArtifactRef::Id(demo.id), json!({}))
        .await
        .unwrap();
    assert_eq!(ok.status, AuditStatus::Succeeded);
    assert!(ok.error.is_none());

    let failed = s
        .orchestrator
        .execute(&ArtifactRef::Id(broken.id), json!({}))
        .await
        .unwrap();
    assert_eq!(failed.status, AuditStatus::Failed);
    let message = failed.error.unwrap_or_default();
    assert!(message.starts_with("compilation failed: "));
    assert!(message.len() > "compilation failed: ".len());
}

#[tokio::test]
async fn repeated_runs_compile_once() {
    let s = stack();
    s.registry
        .insert(NewArtifact::new("Demo", Language::Compiled, DEMO))
        .await
        .unwrap();

    for _ in 0..2 {
        let audit = s
            .orchestrator
            .execute(&ArtifactRef::from("Demo"), json!({}))
            .await
            .unwrap();
        assert_eq!(audit.status, AuditStatus::Succeeded);
    }
    assert_eq!(s.wasm.cache().compile_count(), 1);

    let audits = s
        .service
        .list_audits(&ArtifactRef::from("Demo"), 10)
        .await
        .unwrap();
    assert_eq!(audits.len(), 2);
    assert!(audits.iter().all(|a| a.status == AuditStatus::Succeeded));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_hand_out_each_job_once() {
    for (claimants, jobs) in [(2usize, 1usize), (4, 10), (8, 50)] {
        let queue = Arc::new(InMemoryJobQueue::new());
        let mut enqueued = HashSet::new();
        for i in 0..jobs {
            enqueued.insert(
                queue
                    .enqueue(JobKind::Execute, "X", json!({ "i": i }))
                    .await
                    .unwrap(),
            );
        }

        let mut handles = Vec::new();
        for _ in 0..claimants {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = queue.claim_next().await.unwrap() {
                    claimed.push(job.id);
                }
                claimed
            }));
        }

        let mut seen: Vec<JobId> = Vec::new();
        for handle in handles {
            seen.extend(handle.await.unwrap());
        }

        assert_eq!(seen.len(), jobs, "{claimants} claimants, {jobs} jobs");
        assert_eq!(seen.into_iter().collect::<HashSet<_>>(), enqueued);
        assert_eq!(queue.stats().await.unwrap().running, jobs);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_shot_claims_return_exactly_the_queued_jobs() {
    let (claimants, jobs) = (8usize, 3usize);
    let queue = Arc::new(InMemoryJobQueue::new());
    for i in 0..jobs {
        queue.enqueue(JobKind::Compile, "X", json!({ "i": i })).await.unwrap();
    }

    let handles: Vec<_> = (0..claimants)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.claim_next().await.unwrap() })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in handles {
        if let Some(job) = handle.await.unwrap() {
            assert_eq!(job.attempts, 1);
            claimed.push(job.id);
        }
    }
    assert_eq!(claimed.len(), jobs);
    assert_eq!(claimed.iter().collect::<HashSet<_>>().len(), jobs);
}

#[tokio::test]
async fn unknown_kind_errors_and_queue_moves_on() {
    let s = stack();
    s.registry
        .insert(NewArtifact::new("Demo", Language::Compiled, DEMO))
        .await
        .unwrap();

    let odd = s
        .queue
        .enqueue(JobKind::parse("frobnicate"), "Demo", json!({}))
        .await
        .unwrap();
    let next = s
        .queue
        .enqueue(JobKind::Execute, "Demo", json!({}))
        .await
        .unwrap();

    assert!(matches!(s.worker.tick().await, TickOutcome::Failed(id, _) if id == odd));
    assert_eq!(s.worker.tick().await, TickOutcome::Done(next));

    let odd = s.queue.get(odd).await.unwrap().unwrap();
    assert_eq!(odd.status, JobStatus::Error);
    assert!(odd.error.unwrap_or_default().contains("frobnicate"));
}

#[tokio::test]
async fn approval_flow_runs_follow_up_jobs() {
    let s = stack();
    let approval = s
        .service
        .approve(NewArtifact::new("Demo", Language::Compiled, DEMO).created_by("ops"))
        .await
        .unwrap();
    assert_eq!(approval.jobs.len(), 2);

    while s.worker.tick().await != TickOutcome::Idle {}

    let stats = s.queue.stats().await.unwrap();
    assert_eq!(stats.done, 2);
    assert_eq!(stats.error, 0);

    // The compile job went through the orchestrator and left an audit.
    let audits = s
        .audits
        .list_for_artifact(approval.artifact.id, 10)
        .await
        .unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].status, AuditStatus::Succeeded);
}

#[tokio::test]
async fn disabled_artifact_job_fails_without_audit() {
    let s = stack();
    let artifact = s
        .service
        .register(NewArtifact::new("Demo", Language::Compiled, DEMO))
        .await
        .unwrap();
    s.service.disable("Demo").await.unwrap();

    let id = s
        .queue
        .enqueue(JobKind::Execute, "Demo", json!({}))
        .await
        .unwrap();
    assert!(matches!(s.worker.tick().await, TickOutcome::Failed(job, _) if job == id));
    assert!(s
        .audits
        .list_for_artifact(artifact.id, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let s = stack();
    s.registry
        .insert(NewArtifact::new("Demo", Language::Compiled, DEMO))
        .await
        .unwrap();
    assert!(s
        .registry
        .insert(NewArtifact::new("Demo", Language::Compiled, DEMO))
        .await
        .is_err());
    assert_eq!(s.registry.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn approving_new_source_drops_stale_units() {
    let s = stack();
    s.service
        .register(NewArtifact::new("Demo", Language::Compiled, DEMO))
        .await
        .unwrap();
    let first = s
        .orchestrator
        .execute(&ArtifactRef::from("Demo"), json!({}))
        .await
        .unwrap();
    assert_eq!(first.status, AuditStatus::Succeeded);
    assert_eq!(s.wasm.cache().len(), 1);

    // Compiles fine, traps when run.
    s.service
        .approve(NewArtifact::new("Demo", Language::Compiled, TRAPPING_DEMO))
        .await
        .unwrap();
    assert_eq!(s.wasm.cache().len(), 0);

    let second = s
        .orchestrator
        .execute(&ArtifactRef::from("Demo"), json!({}))
        .await
        .unwrap();
    assert_eq!(second.status, AuditStatus::Failed);
    assert!(second
        .error
        .unwrap_or_default()
        .starts_with("execution failed: "));
    assert_eq!(s.wasm.cache().len(), 1);
}

#[tokio::test]
async fn uuid_shaped_names_cannot_be_registered() {
    let s = stack();
    let name = JobId::new().to_string();
    assert!(s
        .service
        .register(NewArtifact::new(&name, Language::Compiled, DEMO))
        .await
        .is_err());
    assert!(matches!(ArtifactRef::parse(&name), ArtifactRef::Id(_)));
}
