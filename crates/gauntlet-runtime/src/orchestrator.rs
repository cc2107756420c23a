use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use gauntlet_pool::{PoolError, WorktreePool, WorktreePoolConfig, WorktreeSnapshot};
use gauntlet_protocol::api::{SessionProgress, SessionStatusResponse, StartSessionResponse};
use gauntlet_protocol::{
    ParallelTestReport, SessionId, SessionStatus, TestRequest, TestRunner, WorkerId,
    WorkerStatusSnapshot,
};
use gauntlet_queue::{QueueError, QueueSummary, TestQueue};
use gauntlet_vcs::WorktreeVcs;

use crate::worker::ExecutionWorker;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("session setup failed: {0}")]
    Setup(String),
    #[error("session is closed to new work")]
    SessionClosed,
    #[error(transparent)]
    Rejected(#[from] QueueError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelOrchestratorConfig {
    pub num_workers: usize,
    pub worktree_base_dir: PathBuf,
    pub base_branch: String,
    pub max_queue_size: usize,
    pub drain_poll_interval: Duration,
    pub cleanup_on_completion: bool,
    pub preserve_failed_worktrees: bool,
}

impl ParallelOrchestratorConfig {
    pub fn new(num_workers: usize, worktree_base_dir: impl Into<PathBuf>) -> Self {
        Self {
            num_workers,
            worktree_base_dir: worktree_base_dir.into(),
            base_branch: "main".to_owned(),
            max_queue_size: 100,
            drain_poll_interval: Duration::from_millis(100),
            cleanup_on_completion: true,
            preserve_failed_worktrees: false,
        }
    }

    pub fn with_base_branch(mut self, base_branch: impl Into<String>) -> Self {
        self.base_branch = base_branch.into();
        self
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn with_drain_poll_interval(mut self, drain_poll_interval: Duration) -> Self {
        self.drain_poll_interval = drain_poll_interval;
        self
    }

    pub fn with_cleanup_on_completion(mut self, cleanup_on_completion: bool) -> Self {
        self.cleanup_on_completion = cleanup_on_completion;
        self
    }

    pub fn with_preserve_failed_worktrees(mut self, preserve: bool) -> Self {
        self.preserve_failed_worktrees = preserve;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Created,
    Initialized,
    Running,
    Closed,
}

struct SessionState {
    phase: SessionPhase,
    started_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
    completion_claimed: bool,
}

/// Full internal status snapshot, cheap to take: three short-lived locks,
/// no suspension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub queue: QueueSummary,
    pub workers: Vec<WorkerStatusSnapshot>,
    pub worktrees: Vec<WorktreeSnapshot>,
}

/// Composes the queue, the worktree pool, and `num_workers` execution
/// workers into one session: `initialize -> start -> submit* ->
/// wait_for_completion -> shutdown`. Collaborators are injected at
/// construction; the orchestrator holds no process-wide state.
pub struct ParallelOrchestrator {
    config: ParallelOrchestratorConfig,
    session_id: SessionId,
    created_at: OffsetDateTime,
    queue: TestQueue,
    pool: WorktreePool,
    runner: Arc<dyn TestRunner>,
    workers: Mutex<Vec<ExecutionWorker>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    session: Mutex<SessionState>,
}

impl ParallelOrchestrator {
    pub fn new(
        config: ParallelOrchestratorConfig,
        runner: Arc<dyn TestRunner>,
        vcs: Arc<dyn WorktreeVcs>,
    ) -> Result<Self, OrchestratorError> {
        if config.num_workers == 0 {
            return Err(OrchestratorError::Setup(
                "num_workers must be at least one".to_owned(),
            ));
        }
        if config.max_queue_size == 0 {
            return Err(OrchestratorError::Setup(
                "max_queue_size must be at least one".to_owned(),
            ));
        }

        let queue = TestQueue::new(config.max_queue_size);
        let pool_config = WorktreePoolConfig::new(config.num_workers, &config.worktree_base_dir)
            .with_base_branch(config.base_branch.clone())
            .with_preserve_failed_worktrees(config.preserve_failed_worktrees);
        let pool = WorktreePool::new(pool_config, vcs);

        Ok(Self {
            config,
            session_id: SessionId::generate(),
            created_at: OffsetDateTime::now_utc(),
            queue,
            pool,
            runner,
            workers: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            session: Mutex::new(SessionState {
                phase: SessionPhase::Created,
                started_at: None,
                completed_at: None,
                completion_claimed: false,
            }),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn config(&self) -> &ParallelOrchestratorConfig {
        &self.config
    }

    /// Build the worktree pool and the worker set. A pool setup failure
    /// rolls back every partially-created worktree before surfacing.
    pub async fn initialize(&self) -> Result<(), OrchestratorError> {
        {
            let session = self.session.lock().expect("session state lock poisoned");
            match session.phase {
                SessionPhase::Closed => return Err(OrchestratorError::SessionClosed),
                SessionPhase::Initialized | SessionPhase::Running => {
                    tracing::warn!(session = %self.session_id, "orchestrator already initialized");
                    return Ok(());
                }
                SessionPhase::Created => {}
            }
        }

        self.pool.initialize().await.map_err(|error| match error {
            PoolError::Setup(detail) => OrchestratorError::Setup(detail),
            other => OrchestratorError::Setup(other.to_string()),
        })?;

        let workers: Vec<ExecutionWorker> = (1..=self.config.num_workers)
            .map(|index| {
                ExecutionWorker::new(
                    WorkerId::new(format!("worker-{index}")),
                    self.queue.clone(),
                    self.pool.clone(),
                    Arc::clone(&self.runner),
                )
            })
            .collect();
        *self.workers.lock().expect("worker list lock poisoned") = workers;

        let mut session = self.session.lock().expect("session state lock poisoned");
        session.phase = SessionPhase::Initialized;
        tracing::info!(
            session = %self.session_id,
            num_workers = self.config.num_workers,
            "orchestrator initialized"
        );
        Ok(())
    }

    /// Launch every worker in its own task. A no-op when already started.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        {
            let mut session = self.session.lock().expect("session state lock poisoned");
            match session.phase {
                SessionPhase::Created => {
                    return Err(OrchestratorError::Setup(
                        "orchestrator is not initialized".to_owned(),
                    ))
                }
                SessionPhase::Closed => return Err(OrchestratorError::SessionClosed),
                SessionPhase::Running => return Ok(()),
                SessionPhase::Initialized => {
                    session.phase = SessionPhase::Running;
                    session.started_at = Some(OffsetDateTime::now_utc());
                }
            }
        }

        let workers = self.workers.lock().expect("worker list lock poisoned");
        let mut handles = self.handles.lock().expect("worker handle lock poisoned");
        for worker in workers.iter() {
            handles.push(worker.spawn());
        }
        tracing::info!(
            session = %self.session_id,
            num_workers = workers.len(),
            "session started"
        );
        Ok(())
    }

    pub fn submit_test(&self, request: TestRequest) -> Result<(), OrchestratorError> {
        self.ensure_accepting_submissions()?;
        self.queue.enqueue(request)?;
        Ok(())
    }

    pub fn submit_batch(&self, requests: Vec<TestRequest>) -> Result<(), OrchestratorError> {
        self.ensure_accepting_submissions()?;
        self.queue.enqueue_batch(requests)?;
        Ok(())
    }

    fn ensure_accepting_submissions(&self) -> Result<(), OrchestratorError> {
        let session = self.session.lock().expect("session state lock poisoned");
        if session.phase == SessionPhase::Closed || session.completion_claimed {
            return Err(OrchestratorError::SessionClosed);
        }
        Ok(())
    }

    /// Block until the queue drains, then build the session report.
    /// Callable at most once per session.
    pub async fn wait_for_completion(&self) -> Result<ParallelTestReport, OrchestratorError> {
        {
            let mut session = self.session.lock().expect("session state lock poisoned");
            if session.completion_claimed {
                return Err(OrchestratorError::SessionClosed);
            }
            session.completion_claimed = true;
        }

        self.queue
            .wait_until_drained(self.config.drain_poll_interval)
            .await;

        let summary = self.queue.summary();
        let completed_at = OffsetDateTime::now_utc();
        let started_at = {
            let mut session = self.session.lock().expect("session state lock poisoned");
            session.completed_at = Some(completed_at);
            session.started_at.unwrap_or(self.created_at)
        };

        let status = SessionStatus::derive(summary.total, summary.passed, summary.failed);
        let report = ParallelTestReport {
            session_id: self.session_id.clone(),
            status,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).as_seconds_f64(),
            num_workers: self.config.num_workers,
            total_tests: summary.total,
            tests_passed: summary.passed,
            tests_failed: summary.failed,
            success_rate: ParallelTestReport::success_rate_for(summary.passed, summary.total),
            warnings: self.pool.warnings(),
            results: self.queue.results(),
        };
        tracing::info!(
            session = %self.session_id,
            status = ?report.status,
            total = report.total_tests,
            passed = report.tests_passed,
            failed = report.tests_failed,
            "session report generated"
        );
        Ok(report)
    }

    /// Stop every worker, wait for them to exit, and clean the pool.
    /// Idempotent; a worker mid-attempt finishes that attempt first.
    pub async fn shutdown(&self) {
        {
            let mut session = self.session.lock().expect("session state lock poisoned");
            if session.phase == SessionPhase::Closed {
                return;
            }
            session.phase = SessionPhase::Closed;
        }
        tracing::info!(session = %self.session_id, "shutting down session");

        {
            let workers = self.workers.lock().expect("worker list lock poisoned");
            for worker in workers.iter() {
                worker.request_stop();
            }
        }
        // Wake workers blocked on acquire so they can observe the stop flag.
        self.pool.close();

        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().expect("worker handle lock poisoned");
            handles.drain(..).collect()
        };
        for handle in handles {
            if let Err(error) = handle.await {
                tracing::warn!(session = %self.session_id, %error, "worker task ended abnormally");
            }
        }

        if self.config.cleanup_on_completion {
            self.pool.cleanup().await;
        } else {
            tracing::warn!(
                session = %self.session_id,
                base_dir = %self.config.worktree_base_dir.display(),
                "leaving worktrees in place for inspection"
            );
        }
        tracing::info!(session = %self.session_id, "session shut down");
    }

    fn session_status(&self, summary: &QueueSummary) -> SessionStatus {
        let session = self.session.lock().expect("session state lock poisoned");
        if session.completed_at.is_some() {
            SessionStatus::derive(summary.total, summary.passed, summary.failed)
        } else if summary.total == 0 {
            SessionStatus::NoTests
        } else {
            SessionStatus::Running
        }
    }

    pub fn get_status(&self) -> OrchestratorStatus {
        let summary = self.queue.summary();
        let status = self.session_status(&summary);
        let workers = self.workers.lock().expect("worker list lock poisoned");
        OrchestratorStatus {
            session_id: self.session_id.clone(),
            status,
            queue: summary,
            workers: workers.iter().map(ExecutionWorker::snapshot).collect(),
            worktrees: self.pool.status_snapshot(),
        }
    }

    pub fn start_response(&self) -> StartSessionResponse {
        let summary = self.queue.summary();
        StartSessionResponse {
            session_id: self.session_id.clone(),
            status: self.session_status(&summary),
            num_workers: self.config.num_workers,
            tests_queued: summary.total,
        }
    }

    pub fn status_response(&self) -> SessionStatusResponse {
        let summary = self.queue.summary();
        let status = self.session_status(&summary);
        let workers = self.workers.lock().expect("worker list lock poisoned");
        SessionStatusResponse {
            session_id: self.session_id.clone(),
            status,
            progress: SessionProgress {
                total: summary.total,
                completed: summary.passed,
                running: summary.running,
                pending: summary.pending,
                failed: summary.failed,
            },
            workers: workers.iter().map(ExecutionWorker::snapshot).collect(),
        }
    }

    /// Convenience composition: initialize, start, submit the batch, wait
    /// for the report, and shut down on every exit path.
    pub async fn run_tests(
        &self,
        requests: Vec<TestRequest>,
    ) -> Result<ParallelTestReport, OrchestratorError> {
        let outcome = async {
            self.initialize().await?;
            self.start()?;
            self.submit_batch(requests)?;
            self.wait_for_completion().await
        }
        .await;
        self.shutdown().await;
        outcome
    }

    /// Scoped acquisition: run `f` against a started orchestrator with
    /// `shutdown` guaranteed on every exit path, including errors from `f`.
    pub async fn run_scoped<T, F, Fut>(
        config: ParallelOrchestratorConfig,
        runner: Arc<dyn TestRunner>,
        vcs: Arc<dyn WorktreeVcs>,
        f: F,
    ) -> Result<T, OrchestratorError>
    where
        F: FnOnce(Arc<ParallelOrchestrator>) -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let orchestrator = Arc::new(Self::new(config, runner, vcs)?);
        let outcome = async {
            orchestrator.initialize().await?;
            orchestrator.start()?;
            f(Arc::clone(&orchestrator)).await
        }
        .await;
        orchestrator.shutdown().await;
        outcome
    }
}
