//! End-to-end pipeline controller tests against the in-memory store.
//!
//! Scripted executors stand in for the external LLM / SEO / WordPress
//! collaborators so every lifecycle path is deterministic: completion,
//! retry exhaustion, permanent failure, timeout, cancellation, and crash
//! recovery.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::{Notify, Semaphore};

use nichepress_core::activity::{
    EVENT_PROJECT_CANCELLED, EVENT_PROJECT_COMPLETED, EVENT_PROJECT_CREATED, EVENT_PROJECT_FAILED,
    EVENT_PROJECT_STARTED, EVENT_STAGE_RETRYING,
};
use nichepress_core::project::{Preferences, Project, ProjectSnapshot};
use nichepress_core::stage::Stage;
use nichepress_core::status::{ProjectStatus, StageStatus};
use nichepress_core::store::ProjectStore;
use nichepress_core::types::ProjectId;
use nichepress_db::MemoryStore;
use nichepress_events::EventBus;
use nichepress_pipeline::{
    CancelOutcome, ExecutorRegistry, PipelineConfig, PipelineError, PipelineManager,
    RecoverySweeper, StageContext, StageError, StageExecutor,
};

// ---------------------------------------------------------------------------
// Scripted executors
// ---------------------------------------------------------------------------

/// Fails the first `failures` calls, then succeeds.
struct FailNTimes {
    failures: u32,
    calls: AtomicU32,
    permanent: bool,
}

impl FailNTimes {
    fn transient(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            permanent: false,
        }
    }

    fn permanent() -> Self {
        Self {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            permanent: true,
        }
    }
}

#[async_trait]
impl StageExecutor for FailNTimes {
    async fn execute(&self, _ctx: StageContext) -> Result<serde_json::Value, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            if self.permanent {
                Err(StageError::permanent("invalid WordPress credentials"))
            } else {
                Err(StageError::transient("simulated upstream timeout"))
            }
        } else {
            Ok(json!({ "recovered": true }))
        }
    }
}

/// Signals that it started, then never returns; only cancellation ends it.
struct BlockUntilCancelled {
    started: Arc<Notify>,
}

#[async_trait]
impl StageExecutor for BlockUntilCancelled {
    async fn execute(&self, _ctx: StageContext) -> Result<serde_json::Value, StageError> {
        self.started.notify_one();
        std::future::pending::<()>().await;
        unreachable!("pending future never resolves")
    }
}

/// Sleeps longer than any test stage timeout.
struct Slow(Duration);

#[async_trait]
impl StageExecutor for Slow {
    async fn execute(&self, _ctx: StageContext) -> Result<serde_json::Value, StageError> {
        tokio::time::sleep(self.0).await;
        Ok(json!({ "slow": true }))
    }
}

/// Completes one call per semaphore permit, letting a test single-step the
/// pipeline from outside.
struct Gated {
    permits: Arc<Semaphore>,
}

#[async_trait]
impl StageExecutor for Gated {
    async fn execute(&self, _ctx: StageContext) -> Result<serde_json::Value, StageError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| StageError::permanent("gate closed"))?;
        permit.forget();
        Ok(json!({ "gated": true }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Millisecond-scale retry policy so failure paths stay fast.
fn fast_config() -> PipelineConfig {
    PipelineConfig {
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(4),
        stage_timeout: Duration::from_secs(5),
    }
}

struct Harness {
    manager: Arc<PipelineManager>,
    store: Arc<MemoryStore>,
}

fn harness(registry: ExecutorRegistry, config: PipelineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());
    let manager = Arc::new(
        PipelineManager::new(
            Arc::clone(&store) as Arc<dyn ProjectStore>,
            Arc::new(registry),
            bus,
            config,
        )
        .expect("complete registry"),
    );
    Harness { manager, store }
}

fn simulated_harness() -> Harness {
    harness(ExecutorRegistry::simulated(), fast_config())
}

/// Simulated registry with specific stages overridden.
fn registry_with(overrides: Vec<(Stage, Arc<dyn StageExecutor>)>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::simulated();
    for (stage, executor) in overrides {
        registry.register(stage, executor);
    }
    registry
}

async fn wait_for_completed_count(
    store: &Arc<MemoryStore>,
    id: ProjectId,
    count: usize,
) -> ProjectSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = store.load(id).await.unwrap();
        let done = snapshot
            .stages
            .iter()
            .filter(|r| r.status == StageStatus::Completed)
            .count();
        if done >= count {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} completed stages"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn assert_events_ordered(snapshot: &ProjectSnapshot) {
    for pair in snapshot.events.windows(2) {
        assert!(pair[0].seq < pair[1].seq, "event sequences must increase");
        assert!(
            pair[0].timestamp <= pair[1].timestamp,
            "event timestamps must be non-decreasing"
        );
    }
}

// ---------------------------------------------------------------------------
// Test: all nine stages succeed in order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_pipeline_completes_with_deployment_url() {
    let h = simulated_harness();

    let project = h
        .manager
        .launch("fitness blog".into(), Preferences::default())
        .await
        .unwrap();
    assert_eq!(project.status, ProjectStatus::InProgress);
    assert_eq!(project.current_stage, Some(Stage::Requirements));
    assert_eq!(project.progress, 0);

    h.manager.join(project.id).await;

    let snapshot = h.manager.status(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Completed);
    assert_eq!(snapshot.project.progress, 100);
    assert_eq!(snapshot.project.current_stage, None);
    assert!(snapshot.project.error.is_none());

    let url = snapshot.project.deployment_url.as_deref().unwrap();
    assert!(url.contains("fitness-blog"), "unexpected url {url}");

    assert_eq!(snapshot.stages.len(), 9);
    for record in &snapshot.stages {
        assert_eq!(record.status, StageStatus::Completed);
        assert_eq!(record.attempts, 1);
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());
        assert!(record.output.is_some());
    }

    // created + started + 9 × (started, completed) + completed.
    assert_eq!(snapshot.events.len(), 21);
    assert_eq!(snapshot.events[0].kind, EVENT_PROJECT_CREATED);
    assert_eq!(snapshot.events[1].kind, EVENT_PROJECT_STARTED);
    assert_eq!(
        snapshot.events.last().unwrap().kind,
        EVENT_PROJECT_COMPLETED
    );
    assert_events_ordered(&snapshot);
}

// ---------------------------------------------------------------------------
// Test: stage 3 exhausts its retry budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stage_three_retry_exhaustion_freezes_progress() {
    let h = harness(
        registry_with(vec![(Stage::SeoStrategy, Arc::new(FailNTimes::transient(3)))]),
        fast_config(),
    );

    let project = h
        .manager
        .launch("fitness blog".into(), Preferences::default())
        .await
        .unwrap();
    h.manager.join(project.id).await;

    let snapshot = h.manager.status(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Failed);
    assert_eq!(snapshot.project.progress, 22);
    // The stage pointer stays on the failed stage.
    assert_eq!(snapshot.project.current_stage, Some(Stage::SeoStrategy));
    let error = snapshot.project.error.as_deref().unwrap();
    assert!(error.contains("seo_strategy"), "unexpected error {error}");

    assert_eq!(snapshot.stages[0].status, StageStatus::Completed);
    assert_eq!(snapshot.stages[1].status, StageStatus::Completed);
    assert_eq!(snapshot.stages[2].status, StageStatus::Failed);
    assert_eq!(snapshot.stages[2].attempts, 3);
    assert!(snapshot.stages[2]
        .error
        .as_deref()
        .unwrap()
        .contains("after 3 attempts"));

    // A failed stage halts all downstream stages: none ever leaves pending.
    for record in &snapshot.stages[3..] {
        assert_eq!(record.status, StageStatus::Pending);
        assert_eq!(record.attempts, 0);
    }

    let retries = snapshot
        .events
        .iter()
        .filter(|e| e.kind == EVENT_STAGE_RETRYING)
        .count();
    assert_eq!(retries, 2);
    assert_eq!(snapshot.events.last().unwrap().kind, EVENT_PROJECT_FAILED);
    assert_events_ordered(&snapshot);
}

// ---------------------------------------------------------------------------
// Test: a transient failure within budget recovers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failure_recovers_within_budget() {
    let h = harness(
        registry_with(vec![(
            Stage::ContentGeneration,
            Arc::new(FailNTimes::transient(2)),
        )]),
        fast_config(),
    );

    let project = h
        .manager
        .launch("travel blog".into(), Preferences::default())
        .await
        .unwrap();
    h.manager.join(project.id).await;

    let snapshot = h.manager.status(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Completed);
    assert_eq!(snapshot.stages[Stage::ContentGeneration.index()].attempts, 3);
}

// ---------------------------------------------------------------------------
// Test: permanent errors are not retried
// ---------------------------------------------------------------------------

#[tokio::test]
async fn permanent_failure_fails_without_retry() {
    let h = harness(
        registry_with(vec![(Stage::WordpressSetup, Arc::new(FailNTimes::permanent()))]),
        fast_config(),
    );

    let project = h
        .manager
        .launch("cooking blog".into(), Preferences::default())
        .await
        .unwrap();
    h.manager.join(project.id).await;

    let snapshot = h.manager.status(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Failed);

    let record = &snapshot.stages[Stage::WordpressSetup.index()];
    assert_eq!(record.status, StageStatus::Failed);
    assert_eq!(record.attempts, 1);
    assert!(record
        .error
        .as_deref()
        .unwrap()
        .contains("invalid WordPress credentials"));

    let retries = snapshot
        .events
        .iter()
        .filter(|e| e.kind == EVENT_STAGE_RETRYING)
        .count();
    assert_eq!(retries, 0);
}

// ---------------------------------------------------------------------------
// Test: a stage timeout spends an attempt like any transient failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_counts_against_retry_budget() {
    let config = PipelineConfig {
        max_attempts: 2,
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(2),
        stage_timeout: Duration::from_millis(20),
    };
    let h = harness(
        registry_with(vec![(
            Stage::Requirements,
            Arc::new(Slow(Duration::from_secs(60))),
        )]),
        config,
    );

    let project = h
        .manager
        .launch("gardening blog".into(), Preferences::default())
        .await
        .unwrap();
    h.manager.join(project.id).await;

    let snapshot = h.manager.status(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Failed);

    let record = &snapshot.stages[0];
    assert_eq!(record.status, StageStatus::Failed);
    assert_eq!(record.attempts, 2);
    assert!(record.error.as_deref().unwrap().contains("timed out"));
}

// ---------------------------------------------------------------------------
// Test: cancel mid-stage skips everything unfinished
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_mid_stage_skips_remaining_stages() {
    let started = Arc::new(Notify::new());
    let h = harness(
        registry_with(vec![(
            Stage::Requirements,
            Arc::new(BlockUntilCancelled {
                started: Arc::clone(&started),
            }),
        )]),
        fast_config(),
    );

    let project = h
        .manager
        .launch("fitness blog".into(), Preferences::default())
        .await
        .unwrap();
    started.notified().await;

    let outcome = h.manager.cancel(project.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Signalled);
    h.manager.join(project.id).await;

    let snapshot = h.manager.status(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Cancelled);
    assert_eq!(snapshot.project.current_stage, None);
    assert_eq!(snapshot.project.progress, 0);

    for record in &snapshot.stages {
        assert_eq!(record.status, StageStatus::Skipped);
    }
    // The in-flight stage is closed out; never-started stages have no timestamps.
    assert!(snapshot.stages[0].finished_at.is_some());
    assert!(snapshot.stages[1].finished_at.is_none());

    assert_eq!(
        snapshot.events.last().unwrap().kind,
        EVENT_PROJECT_CANCELLED
    );
    assert_events_ordered(&snapshot);

    // No further activity events after cancellation confirmation.
    let frozen = snapshot.events.len();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let later = h.manager.status(project.id).await.unwrap();
    assert_eq!(later.events.len(), frozen);

    // Idempotence law: a second cancel changes nothing.
    let outcome = h.manager.cancel(project.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::NoOp);
    assert_eq!(h.manager.status(project.id).await.unwrap(), later);
}

// ---------------------------------------------------------------------------
// Test: cancelling a created or terminal project is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_created_project_is_noop() {
    let h = simulated_harness();

    let project = Project::new("parked idea".into(), Preferences::default(), Utc::now());
    h.store.create(&project).await.unwrap();

    let outcome = h.manager.cancel(project.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::NoOp);

    let snapshot = h.manager.status(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Created);
    assert!(snapshot.events.is_empty());
}

#[tokio::test]
async fn cancel_completed_project_is_noop() {
    let h = simulated_harness();

    let project = h
        .manager
        .launch("finished blog".into(), Preferences::default())
        .await
        .unwrap();
    h.manager.join(project.id).await;

    let outcome = h.manager.cancel(project.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::NoOp);
    assert_eq!(
        h.manager.status(project.id).await.unwrap().project.status,
        ProjectStatus::Completed
    );
}

// ---------------------------------------------------------------------------
// Test: a project starts exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn double_start_conflicts() {
    let h = simulated_harness();

    let project = h
        .manager
        .launch("double start".into(), Preferences::default())
        .await
        .unwrap();

    let err = h.manager.start(project.id).await.unwrap_err();
    assert_matches!(err, PipelineError::Conflict(_));
}

// ---------------------------------------------------------------------------
// Test: progress is monotonic and floored
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_is_monotonic_and_floored() {
    let permits = Arc::new(Semaphore::new(0));
    let gated: Arc<dyn StageExecutor> = Arc::new(Gated {
        permits: Arc::clone(&permits),
    });
    let mut registry = ExecutorRegistry::new();
    for stage in Stage::ALL {
        registry.register(stage, Arc::clone(&gated));
    }
    let h = harness(registry, fast_config());

    let project = h
        .manager
        .launch("stepped blog".into(), Preferences::default())
        .await
        .unwrap();

    let expected = [11u8, 22, 33, 44, 55, 66, 77, 88, 100];
    for (k, want) in expected.iter().enumerate() {
        permits.add_permits(1);
        let snapshot = wait_for_completed_count(&h.store, project.id, k + 1).await;
        assert_eq!(snapshot.project.progress, *want, "after stage {}", k + 1);
    }

    h.manager.join(project.id).await;
    let snapshot = h.manager.status(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Completed);
}

// ---------------------------------------------------------------------------
// Test: invalid intake never enters the pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_intake_is_rejected_synchronously() {
    let h = simulated_harness();

    let err = h
        .manager
        .launch("".into(), Preferences::default())
        .await
        .unwrap_err();
    assert_matches!(err, PipelineError::Core(_));

    let err = h
        .manager
        .launch(
            "fitness blog".into(),
            Preferences {
                articles_per_batch: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, PipelineError::Core(_));

    assert!(h
        .manager
        .list(Default::default())
        .await
        .unwrap()
        .is_empty());
}

// ---------------------------------------------------------------------------
// Test: an orphaned in-progress project is re-driven by the sweeper
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sweeper_resumes_orphaned_project() {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());

    // First process: the driver dies mid-stage (abort, as on shutdown).
    let started = Arc::new(Notify::new());
    let manager_a = Arc::new(
        PipelineManager::new(
            Arc::clone(&store) as Arc<dyn ProjectStore>,
            Arc::new(registry_with(vec![(
                Stage::Requirements,
                Arc::new(BlockUntilCancelled {
                    started: Arc::clone(&started),
                }),
            )])),
            Arc::clone(&bus),
            fast_config(),
        )
        .unwrap(),
    );
    let project = manager_a
        .launch("interrupted blog".into(), Preferences::default())
        .await
        .unwrap();
    started.notified().await;
    manager_a.shutdown().await;

    let snapshot = store.load(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::InProgress);

    // Second process: a fresh manager with working executors sweeps it up.
    let manager_b = Arc::new(
        PipelineManager::new(
            Arc::clone(&store) as Arc<dyn ProjectStore>,
            Arc::new(ExecutorRegistry::simulated()),
            bus,
            fast_config(),
        )
        .unwrap(),
    );
    let sweeper = RecoverySweeper::with_interval(Arc::clone(&manager_b), Duration::from_millis(10));

    let revived = sweeper.sweep().await.unwrap();
    assert_eq!(revived, 1);

    manager_b.join(project.id).await;
    let snapshot = store.load(project.id).await.unwrap();
    assert_eq!(snapshot.project.status, ProjectStatus::Completed);
    assert_eq!(snapshot.project.progress, 100);
}

// ---------------------------------------------------------------------------
// Test: the sweeper starts projects stranded before their driver spawned
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sweeper_starts_stale_created_project() {
    let h = simulated_harness();

    let stale = Project::new(
        "stranded blog".into(),
        Preferences::default(),
        Utc::now() - chrono::Duration::seconds(60),
    );
    h.store.create(&stale).await.unwrap();

    let sweeper = RecoverySweeper::with_interval(Arc::clone(&h.manager), Duration::from_millis(10));
    let revived = sweeper.sweep().await.unwrap();
    assert_eq!(revived, 1);

    h.manager.join(stale.id).await;
    assert_eq!(
        h.manager.status(stale.id).await.unwrap().project.status,
        ProjectStatus::Completed
    );
}

// ---------------------------------------------------------------------------
// Test: an incomplete registry is rejected at startup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn incomplete_registry_is_rejected_at_startup() {
    let store = Arc::new(MemoryStore::new());
    let err = PipelineManager::new(
        store as Arc<dyn ProjectStore>,
        Arc::new(ExecutorRegistry::new()),
        Arc::new(EventBus::default()),
        PipelineConfig::default(),
    )
    .err()
    .expect("empty registry must be rejected");
    assert_matches!(err, PipelineError::MissingExecutor(Stage::Requirements));
}
