#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use gauntlet_protocol::{RunnerInvocation, RunnerResult, TestRequest, TestRunner};
use gauntlet_vcs::{VcsError, WorktreeVcs};

pub struct TempDir {
    pub path: PathBuf,
}

impl TempDir {
    pub fn new(label: &str) -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "gauntlet-runtime-{label}-{}-{stamp}",
            std::process::id()
        ));
        fs::create_dir_all(&path).expect("create temp dir");
        Self { path }
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// In-memory stand-in for the git driver: worktrees are plain directories.
#[derive(Default)]
pub struct MockVcs;

#[async_trait]
impl WorktreeVcs for MockVcs {
    async fn health_check(&self) -> Result<(), VcsError> {
        Ok(())
    }

    async fn create_worktree(
        &self,
        path: &Path,
        _branch: &str,
        _base_branch: &str,
    ) -> Result<(), VcsError> {
        fs::create_dir_all(path)
            .map_err(|error| VcsError::DependencyUnavailable(error.to_string()))
    }

    async fn remove_worktree(&self, path: &Path, _branch: &str) -> Result<(), VcsError> {
        let _ = fs::remove_dir_all(path);
        Ok(())
    }

    async fn reset_worktree(&self, _path: &Path, _branch: &str) -> Result<(), VcsError> {
        Ok(())
    }

    async fn integrity_check(&self, _path: &Path) -> Result<bool, VcsError> {
        Ok(true)
    }
}

/// Scripted runner: outcomes are queued per plan path; anything without a
/// script completes with five passing tasks after the configured delay.
pub struct StubRunner {
    delay: Duration,
    invocations: AtomicUsize,
    scripted: Mutex<HashMap<String, VecDeque<RunnerResult>>>,
}

impl StubRunner {
    pub fn completing(delay: Duration) -> Self {
        Self {
            delay,
            invocations: AtomicUsize::new(0),
            scripted: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_script(self, plan_path: &str, outcomes: Vec<RunnerResult>) -> Self {
        self.scripted
            .lock()
            .expect("lock scripted outcomes")
            .insert(plan_path.to_owned(), VecDeque::from(outcomes));
        self
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TestRunner for StubRunner {
    async fn run(&self, invocation: RunnerInvocation) -> RunnerResult {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.delay).await;

        let plan = invocation.plan_path.to_string_lossy().to_string();
        let mut scripted = self.scripted.lock().expect("lock scripted outcomes");
        if let Some(outcomes) = scripted.get_mut(&plan) {
            if let Some(result) = outcomes.pop_front() {
                return result;
            }
        }
        RunnerResult::complete(5, 0)
    }
}

/// Runner that always panics; used to prove worker containment.
pub struct PanickingRunner;

#[async_trait]
impl TestRunner for PanickingRunner {
    async fn run(&self, _invocation: RunnerInvocation) -> RunnerResult {
        panic!("stub runner exploded");
    }
}

pub fn request(id: &str) -> TestRequest {
    TestRequest::new(id, format!("plans/{id}.md"))
}

pub fn plan_of(id: &str) -> String {
    format!("plans/{id}.md")
}
