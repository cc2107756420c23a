use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;

use gauntlet_pool::{WorktreeLease, WorktreePool};
use gauntlet_protocol::{
    AttemptStatus, RunnerInvocation, RunnerResult, TestId, TestRequest, TestResult, TestRunner,
    WorkerId, WorkerState, WorkerStatusSnapshot, WorktreeId,
};
use gauntlet_queue::TestQueue;

/// Short dequeue timeout so a worker re-reads its stop flag between polls.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct WorkerObservedState {
    state: WorkerState,
    current_test: Option<TestId>,
    current_worktree: Option<WorktreeId>,
}

struct WorkerInner {
    worker_id: WorkerId,
    queue: TestQueue,
    pool: WorktreePool,
    runner: Arc<dyn TestRunner>,
    stop: AtomicBool,
    observed: Mutex<WorkerObservedState>,
}

impl WorkerInner {
    fn set_state(&self, state: WorkerState) {
        let mut observed = self.observed.lock().expect("worker state lock poisoned");
        observed.state = state;
    }

    fn set_current(&self, test: Option<TestId>, worktree: Option<WorktreeId>) {
        let mut observed = self.observed.lock().expect("worker state lock poisoned");
        observed.current_test = test;
        observed.current_worktree = worktree;
    }
}

/// Long-lived execution agent: dequeue, lease a worktree, invoke the
/// runner, classify the outcome, release the lease. One lease at a time,
/// release on every exit path, and no work created, only moved between
/// queue states.
#[derive(Clone)]
pub struct ExecutionWorker {
    inner: Arc<WorkerInner>,
}

impl ExecutionWorker {
    pub fn new(
        worker_id: WorkerId,
        queue: TestQueue,
        pool: WorktreePool,
        runner: Arc<dyn TestRunner>,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                worker_id,
                queue,
                pool,
                runner,
                stop: AtomicBool::new(false),
                observed: Mutex::new(WorkerObservedState::default()),
            }),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.inner.worker_id
    }

    pub fn spawn(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_worker_loop(inner).await;
        })
    }

    /// Ask the worker to exit. A worker mid-attempt finishes that attempt
    /// first; the flag is observed on the next dequeue poll.
    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatusSnapshot {
        let observed = self
            .inner
            .observed
            .lock()
            .expect("worker state lock poisoned");
        WorkerStatusSnapshot {
            worker_id: self.inner.worker_id.clone(),
            state: observed.state,
            current_test: observed.current_test.clone(),
            current_worktree: observed.current_worktree.clone(),
        }
    }
}

async fn run_worker_loop(inner: Arc<WorkerInner>) {
    tracing::info!(worker = %inner.worker_id, "worker entering main loop");

    loop {
        if inner.stop.load(Ordering::Relaxed) {
            break;
        }

        inner.set_state(WorkerState::Fetching);
        let Some(request) = inner.queue.dequeue(DEQUEUE_TIMEOUT).await else {
            inner.set_state(WorkerState::Idle);
            continue;
        };

        process_request(&inner, request).await;
        inner.set_state(WorkerState::Idle);
    }

    inner.set_current(None, None);
    inner.set_state(WorkerState::Stopped);
    tracing::info!(worker = %inner.worker_id, "worker stopped");
}

async fn process_request(inner: &Arc<WorkerInner>, request: TestRequest) {
    inner.queue.mark_running(&request);
    inner.set_current(Some(request.id.clone()), None);

    inner.set_state(WorkerState::Leasing);
    let lease = match inner.pool.acquire(Some(request.id.clone())).await {
        Ok(lease) => lease,
        Err(error) => {
            tracing::warn!(
                worker = %inner.worker_id,
                test = %request.id,
                %error,
                "worktree lease unavailable"
            );
            let result = synthetic_error_result(
                inner,
                &request,
                format!("worktree lease unavailable: {error}"),
            );
            classify_and_record(inner, &request, result);
            inner.set_current(None, None);
            return;
        }
    };
    inner.set_current(Some(request.id.clone()), Some(lease.id.clone()));

    inner.set_state(WorkerState::Running);
    let started_at = OffsetDateTime::now_utc();
    let attempt = run_attempt(inner, &request, &lease).await;

    inner.set_state(WorkerState::Finalising);
    let result = TestResult {
        request_id: request.id.clone(),
        worktree_id: lease.id.clone(),
        worker_id: inner.worker_id.clone(),
        status: attempt.status,
        tasks_passed: attempt.tasks_passed,
        tasks_failed: attempt.tasks_failed,
        started_at,
        completed_at: OffsetDateTime::now_utc(),
        error_message: attempt.error,
        report_path: attempt.report_path,
    };
    classify_and_record(inner, &request, result);

    // Release follows classification unconditionally; timeouts and runner
    // panics have already been folded into the attempt by this point.
    inner.pool.release(lease).await;
    inner.set_current(None, None);
}

async fn run_attempt(
    inner: &Arc<WorkerInner>,
    request: &TestRequest,
    lease: &WorktreeLease,
) -> RunnerResult {
    let invocation = RunnerInvocation {
        worktree_path: lease.path.clone(),
        plan_path: request.plan_path.clone(),
        batch_range: request.batch_range,
        config: request.config.clone(),
    };

    // The runner executes in its own task so a panic surfaces as a join
    // error instead of unwinding the worker loop.
    let runner = Arc::clone(&inner.runner);
    let mut attempt = tokio::spawn(async move { runner.run(invocation).await });

    match tokio::time::timeout(request.config.task_timeout(), &mut attempt).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => RunnerResult::error(format!("runner task failed: {join_error}")),
        Err(_) => {
            attempt.abort();
            RunnerResult::error(format!(
                "runner timed out after {}s",
                request.config.task_timeout_seconds
            ))
        }
    }
}

fn classify_and_record(inner: &Arc<WorkerInner>, request: &TestRequest, result: TestResult) {
    match result.status {
        AttemptStatus::Complete => {
            tracing::info!(
                worker = %inner.worker_id,
                test = %request.id,
                tasks_passed = result.tasks_passed,
                tasks_failed = result.tasks_failed,
                "test completed"
            );
            inner.queue.mark_completed(&request.id, result);
        }
        AttemptStatus::Failed | AttemptStatus::Error => {
            if inner.queue.requeue_for_retry(request) {
                tracing::warn!(
                    worker = %inner.worker_id,
                    test = %request.id,
                    error = result.error_message.as_deref().unwrap_or("unknown"),
                    "attempt failed, retrying"
                );
            } else {
                tracing::warn!(
                    worker = %inner.worker_id,
                    test = %request.id,
                    error = result.error_message.as_deref().unwrap_or("unknown"),
                    "test failed, retries exhausted"
                );
                inner.queue.mark_failed(&request.id, result);
            }
        }
    }
}

fn synthetic_error_result(
    inner: &Arc<WorkerInner>,
    request: &TestRequest,
    message: String,
) -> TestResult {
    let now = OffsetDateTime::now_utc();
    TestResult {
        request_id: request.id.clone(),
        worktree_id: WorktreeId::new("unknown"),
        worker_id: inner.worker_id.clone(),
        status: AttemptStatus::Error,
        tasks_passed: 0,
        tasks_failed: 0,
        started_at: now,
        completed_at: now,
        error_message: Some(message),
        report_path: None,
    }
}
