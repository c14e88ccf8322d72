//! End-to-end tests exercising the Job Registry, Scheduler, and Execution
//! Adapter wired together as `server.rs` wires them, plus the Search Engine
//! against a real temporary directory tree.

use std::sync::Arc;
use taskrunner::clock::FakeClock;
use taskrunner::config::{SchedulerConfig, SearchConfig, TimeoutConfig, WalkerConfig};
use taskrunner::job::{JobRegistry, JobResult, JobStatus};
use taskrunner::notify::ProgressNotifier;
use taskrunner::scheduler::{ExecutionAdapter, Priority, Scheduler, TaskDescriptor};
use taskrunner::search::{ResultCache, SearchEngine, SearchOptions, SearchStrategy};
use taskrunner::timeout::{Complexity, OperationClass, TimeoutRegistry};

fn descriptor(job_id: uuid::Uuid) -> TaskDescriptor {
    TaskDescriptor {
        task_id: job_id,
        title: "t".into(),
        priority: Priority::Medium,
        estimated_hours: None,
        dependency_ids: Vec::new(),
        memory_mb: 1,
        cpu_weight: 1,
        batch_id: None,
        operation: OperationClass::TaskExecution,
        complexity: Complexity::Simple,
    }
}

async fn await_terminal(registry: &JobRegistry, job_id: uuid::Uuid) {
    for _ in 0..200 {
        if registry.get_job(job_id, false).unwrap().status.is_terminal() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("job {job_id} never reached a terminal state");
}

#[tokio::test]
async fn dedup_under_concurrent_submission() {
    let clock = FakeClock::new();
    let timeouts = Arc::new(TimeoutRegistry::new(TimeoutConfig::default(), Default::default()));
    let notifier = Arc::new(ProgressNotifier::new());
    let registry = Arc::new(JobRegistry::new(clock, timeouts, notifier));

    let params = serde_json::json!({"x": 1, "nested": {"b": 2, "a": 1}});
    let mut handles = Vec::new();
    for _ in 0..50 {
        let registry = registry.clone();
        let params = params.clone();
        handles.push(tokio::spawn(async move { registry.create_job("dedup-test", &params) }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    let first = ids[0];
    assert!(ids.iter().all(|id| *id == first));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn submitted_job_runs_to_completion_through_the_scheduler() {
    let clock = FakeClock::new();
    let timeouts = Arc::new(TimeoutRegistry::new(TimeoutConfig::default(), Default::default()));
    let notifier = Arc::new(ProgressNotifier::new());
    let registry = Arc::new(JobRegistry::new(clock.clone(), timeouts.clone(), notifier));
    let scheduler = Scheduler::new(SchedulerConfig::default(), clock, timeouts);
    let adapter = ExecutionAdapter::new(registry.clone(), scheduler.clone());

    let job_id = registry.create_job("compute", &serde_json::json!({"n": 7}));
    adapter.execute_job(
        job_id,
        descriptor(job_id),
        Box::new(|_token| Box::pin(async { Ok(serde_json::json!({"n_squared": 49})) })),
    );
    scheduler.admit_once();
    await_terminal(&registry, job_id).await;

    let job = registry.get_job(job_id, false).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    match job.result.unwrap() {
        JobResult::Success { result } => assert_eq!(result, serde_json::json!({"n_squared": 49})),
        JobResult::Error { error } => panic!("expected success, got error: {error}"),
    }
}

#[tokio::test]
async fn cancelling_a_running_job_propagates_to_its_execution() {
    let clock = FakeClock::new();
    let timeouts = Arc::new(TimeoutRegistry::new(TimeoutConfig::default(), Default::default()));
    let notifier = Arc::new(ProgressNotifier::new());
    let registry = Arc::new(JobRegistry::new(clock.clone(), timeouts.clone(), notifier));
    let scheduler = Scheduler::new(SchedulerConfig::default(), clock, timeouts);
    let adapter = ExecutionAdapter::new(registry.clone(), scheduler.clone());

    let job_id = registry.create_job("sleep-forever", &serde_json::json!({}));
    adapter.execute_job(
        job_id,
        descriptor(job_id),
        Box::new(|token| {
            Box::pin(async move {
                token.cancelled().await;
                Ok(serde_json::json!({}))
            })
        }),
    );
    scheduler.admit_once();
    tokio::task::yield_now().await;
    registry.update_status(job_id, JobStatus::Running, None, None, None);

    assert!(registry.cancel_job(job_id, "integration-test-abort").await);
    await_terminal(&registry, job_id).await;

    let job = registry.get_job(job_id, false).unwrap();
    assert_eq!(job.status, JobStatus::Failed);

    // Cancelling again is rejected; the job is already terminal.
    assert!(!registry.cancel_job(job_id, "too late").await);
}

#[tokio::test]
async fn adaptive_poll_throttles_then_resets_on_completion() {
    let clock = FakeClock::new();
    let timeouts = Arc::new(TimeoutRegistry::new(TimeoutConfig::default(), Default::default()));
    let notifier = Arc::new(ProgressNotifier::new());
    let registry = Arc::new(JobRegistry::new(clock, timeouts, notifier));

    let job_id = registry.create_job("poll-me", &serde_json::json!({}));
    let first = registry.get_job_with_rate_limit(job_id, true).unwrap();
    assert!(!first.should_wait);

    let second = registry.get_job_with_rate_limit(job_id, true).unwrap();
    assert!(second.should_wait);
    assert!(second.wait_ms > 0);
}

#[tokio::test]
async fn search_files_finds_and_ranks_matches_in_a_real_tree() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("widget_factory.rs"), "struct WidgetFactory;").unwrap();
    std::fs::write(dir.path().join("other.rs"), "struct Unrelated;").unwrap();
    std::fs::create_dir(dir.path().join("target")).unwrap();
    std::fs::write(dir.path().join("target").join("widget_factory.rs"), "ignored").unwrap();

    let clock = FakeClock::new();
    let cache = Arc::new(ResultCache::new(clock, 100, 1_000_000, 60_000));
    let engine = SearchEngine::new(WalkerConfig::default(), cache);

    let mut options = SearchOptions::from_config("widget_factory", &SearchConfig::default());
    options.strategy = SearchStrategy::Fuzzy;
    options.max_results = 10;

    let matches = engine.search(dir.path(), &options).await.unwrap();
    assert!(!matches.is_empty());
    assert!(matches[0].path.contains("widget_factory.rs"));
    assert!(!matches[0].path.contains("target"));
}

#[tokio::test]
async fn search_files_bounds_memory_over_a_large_tree() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..2000 {
        std::fs::write(dir.path().join(format!("file_{i}.txt")), "x").unwrap();
    }
    std::fs::write(dir.path().join("needle_target.txt"), "x").unwrap();

    let clock = FakeClock::new();
    let cache = Arc::new(ResultCache::new(clock, 100, 1_000_000, 60_000));
    let engine = SearchEngine::new(WalkerConfig::default(), cache);

    let mut options = SearchOptions::from_config("needle", &SearchConfig::default());
    options.max_results = 5;

    let matches = engine.search(dir.path(), &options).await.unwrap();
    assert!(matches.len() <= 5);
    assert!(matches.iter().any(|m| m.path.contains("needle_target")));
}
