mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use gauntlet_protocol::{RunnerResult, SessionStatus, TestId};
use gauntlet_queue::QueueError;
use gauntlet_runtime::{OrchestratorError, ParallelOrchestrator, ParallelOrchestratorConfig};

use support::{plan_of, request, MockVcs, StubRunner, TempDir};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn config_for(scratch: &TempDir, num_workers: usize) -> ParallelOrchestratorConfig {
    ParallelOrchestratorConfig::new(num_workers, scratch.path.join("worktrees"))
        .with_max_queue_size(10)
        .with_drain_poll_interval(Duration::from_millis(10))
}

fn orchestrator_with(
    scratch: &TempDir,
    num_workers: usize,
    runner: Arc<StubRunner>,
) -> ParallelOrchestrator {
    ParallelOrchestrator::new(config_for(scratch, num_workers), runner, Arc::new(MockVcs))
        .expect("construct orchestrator")
}

#[tokio::test]
async fn two_parallel_tests_finish_in_one_runner_interval() {
    let scratch = TempDir::new("s1");
    let base_dir = scratch.path.join("worktrees");
    let runner = Arc::new(StubRunner::completing(Duration::from_millis(400)));
    let orchestrator = orchestrator_with(&scratch, 2, runner);

    orchestrator.initialize().await.expect("initialize");
    orchestrator.start().expect("start");
    orchestrator
        .submit_batch(vec![request("test-1"), request("test-2")])
        .expect("submit batch");

    let started = Instant::now();
    let report = timeout(TEST_TIMEOUT, orchestrator.wait_for_completion())
        .await
        .expect("completes in time")
        .expect("report");
    let elapsed = started.elapsed();

    assert_eq!(report.status, SessionStatus::Complete);
    assert_eq!(report.total_tests, 2);
    assert_eq!(report.tests_passed, 2);
    assert_eq!(report.tests_failed, 0);
    assert_eq!(report.success_rate, 100.0);
    // Sequential execution would need two full runner intervals.
    assert!(
        elapsed < Duration::from_millis(700),
        "expected parallel speedup, took {elapsed:?}"
    );

    orchestrator.shutdown().await;
    assert!(!base_dir.exists(), "worktree base dir must be cleaned up");
}

#[tokio::test]
async fn three_workers_drain_three_tests_together() {
    let scratch = TempDir::new("s2");
    let runner = Arc::new(StubRunner::completing(Duration::from_millis(200)));
    let orchestrator = orchestrator_with(&scratch, 3, runner.clone());

    let report = orchestrator
        .run_tests(vec![request("test-1"), request("test-2"), request("test-3")])
        .await
        .expect("session report");

    assert_eq!(report.status, SessionStatus::Complete);
    assert_eq!(report.tests_passed, 3);
    assert_eq!(report.num_workers, 3);
    assert_eq!(report.results.len(), 3);
    assert_eq!(runner.invocation_count(), 3);
}

#[tokio::test]
async fn mixed_outcomes_produce_a_partial_success_report() {
    let scratch = TempDir::new("s3");
    let runner = Arc::new(
        StubRunner::completing(Duration::from_millis(50)).with_script(
            &plan_of("test-2"),
            vec![RunnerResult::failed("batch 2 regressed")],
        ),
    );
    let orchestrator = orchestrator_with(&scratch, 2, runner);

    let report = orchestrator
        .run_tests(vec![request("test-1"), request("test-2"), request("test-3")])
        .await
        .expect("session report");

    assert_eq!(report.status, SessionStatus::PartialSuccess);
    assert_eq!(report.tests_passed, 2);
    assert_eq!(report.tests_failed, 1);

    let failed: Vec<&TestId> = report
        .results
        .iter()
        .filter(|result| !result.status.is_complete())
        .map(|result| &result.request_id)
        .collect();
    assert_eq!(failed, vec![&TestId::new("test-2")]);
}

#[tokio::test]
async fn empty_session_reports_no_tests_and_leaves_a_clean_base_dir() {
    let scratch = TempDir::new("no-tests");
    let base_dir = scratch.path.join("worktrees");
    let runner = Arc::new(StubRunner::completing(Duration::from_millis(10)));
    let orchestrator = orchestrator_with(&scratch, 2, runner);

    orchestrator.initialize().await.expect("initialize");
    let report = orchestrator
        .wait_for_completion()
        .await
        .expect("empty session report");
    orchestrator.shutdown().await;

    assert_eq!(report.status, SessionStatus::NoTests);
    assert_eq!(report.total_tests, 0);
    assert!(report.results.is_empty());
    assert!(!base_dir.exists());
}

#[tokio::test]
async fn shutdown_is_idempotent_and_closes_the_session_to_new_work() {
    let scratch = TempDir::new("shutdown");
    let runner = Arc::new(StubRunner::completing(Duration::from_millis(10)));
    let orchestrator = orchestrator_with(&scratch, 1, runner);

    orchestrator.initialize().await.expect("initialize");
    orchestrator.start().expect("start");
    orchestrator
        .submit_test(request("test-1"))
        .expect("submit test");
    let report = orchestrator.wait_for_completion().await.expect("report");
    assert_eq!(report.status, SessionStatus::Complete);

    orchestrator.shutdown().await;
    orchestrator.shutdown().await;

    assert_eq!(
        orchestrator.submit_test(request("test-late")),
        Err(OrchestratorError::SessionClosed)
    );
    assert!(matches!(
        orchestrator.wait_for_completion().await,
        Err(OrchestratorError::SessionClosed)
    ));
}

#[tokio::test]
async fn duplicate_submissions_are_rejected_without_mutation() {
    let scratch = TempDir::new("duplicate");
    let runner = Arc::new(StubRunner::completing(Duration::from_millis(10)));
    let orchestrator = orchestrator_with(&scratch, 1, runner);

    orchestrator.initialize().await.expect("initialize");
    orchestrator
        .submit_test(request("test-dup"))
        .expect("first submission");
    assert_eq!(
        orchestrator.submit_test(request("test-dup")),
        Err(OrchestratorError::Rejected(QueueError::Duplicate(
            "test-dup".to_owned()
        )))
    );
    assert_eq!(orchestrator.get_status().queue.total, 1);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn cancellation_finishes_at_most_one_attempt_per_worker() {
    let scratch = TempDir::new("s6");
    let base_dir = scratch.path.join("worktrees");
    let runner = Arc::new(StubRunner::completing(Duration::from_millis(400)));
    let orchestrator = orchestrator_with(&scratch, 2, runner);

    orchestrator.initialize().await.expect("initialize");
    orchestrator.start().expect("start");
    orchestrator
        .submit_batch((1..=5).map(|i| request(&format!("test-{i}"))).collect())
        .expect("submit batch");

    tokio::time::sleep(Duration::from_millis(50)).await;
    timeout(TEST_TIMEOUT, orchestrator.shutdown())
        .await
        .expect("shutdown completes despite in-flight work");

    let status = orchestrator.get_status();
    let finished = status.queue.passed + status.queue.failed;
    assert!(
        finished <= 2,
        "each worker may finish at most its in-flight attempt, finished {finished}"
    );
    assert_eq!(status.queue.running, 0, "no attempt may be left running");
    assert_eq!(
        status.queue.total,
        5,
        "unstarted requests stay accounted for"
    );
    assert!(!base_dir.exists(), "no orphan worktrees after shutdown");
}

#[tokio::test]
async fn excess_workers_idle_while_one_test_runs() {
    let scratch = TempDir::new("excess-workers");
    let runner = Arc::new(StubRunner::completing(Duration::from_millis(100)));
    let orchestrator = orchestrator_with(&scratch, 3, runner);

    orchestrator.initialize().await.expect("initialize");
    orchestrator.start().expect("start");
    orchestrator
        .submit_test(request("test-solo"))
        .expect("submit test");

    let report = timeout(TEST_TIMEOUT, orchestrator.wait_for_completion())
        .await
        .expect("completes in time")
        .expect("report");
    assert_eq!(report.tests_passed, 1);

    let status = orchestrator.get_status();
    assert_eq!(status.workers.len(), 3);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn status_surfaces_progress_and_worker_views() {
    let scratch = TempDir::new("status");
    let runner = Arc::new(StubRunner::completing(Duration::from_millis(200)));
    let orchestrator = orchestrator_with(&scratch, 2, runner);

    orchestrator.initialize().await.expect("initialize");
    orchestrator.start().expect("start");
    orchestrator
        .submit_batch(vec![request("test-1"), request("test-2"), request("test-3")])
        .expect("submit batch");

    let start_response = orchestrator.start_response();
    assert_eq!(start_response.num_workers, 2);
    assert_eq!(start_response.tests_queued, 3);
    assert_eq!(start_response.status, SessionStatus::Running);

    let status_response = orchestrator.status_response();
    assert_eq!(status_response.progress.total, 3);
    assert_eq!(status_response.workers.len(), 2);

    let report = timeout(TEST_TIMEOUT, orchestrator.wait_for_completion())
        .await
        .expect("completes in time")
        .expect("report");
    assert_eq!(report.tests_passed, 3);

    // Status derivation is anchored on the completion timestamp.
    assert_eq!(orchestrator.get_status().status, SessionStatus::Complete);
    assert_eq!(orchestrator.get_status().status, SessionStatus::Complete);

    let results_response = gauntlet_protocol::api::SessionResultsResponse::from(&report);
    assert_eq!(results_response.summary.total, 3);
    assert_eq!(results_response.summary.passed, 3);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn run_scoped_shuts_down_on_the_error_path() {
    let scratch = TempDir::new("scoped-error");
    let base_dir = scratch.path.join("worktrees");
    let runner = Arc::new(StubRunner::completing(Duration::from_millis(10)));

    let outcome: Result<(), OrchestratorError> = ParallelOrchestrator::run_scoped(
        config_for(&scratch, 2),
        runner,
        Arc::new(MockVcs),
        |orchestrator| async move {
            orchestrator.submit_test(request("test-1"))?;
            Err(OrchestratorError::Setup("caller gave up".to_owned()))
        },
    )
    .await;

    assert!(matches!(outcome, Err(OrchestratorError::Setup(_))));
    assert!(
        !base_dir.exists(),
        "scoped session must clean up on the error path"
    );
}

#[tokio::test]
async fn run_scoped_yields_the_closure_result_on_success() {
    let scratch = TempDir::new("scoped-ok");
    let runner = Arc::new(StubRunner::completing(Duration::from_millis(20)));

    let report = ParallelOrchestrator::run_scoped(
        config_for(&scratch, 2),
        runner,
        Arc::new(MockVcs),
        |orchestrator| async move {
            orchestrator.submit_batch(vec![request("test-1"), request("test-2")])?;
            orchestrator.wait_for_completion().await
        },
    )
    .await
    .expect("scoped session report");

    assert_eq!(report.status, SessionStatus::Complete);
    assert_eq!(report.tests_passed, 2);
}
