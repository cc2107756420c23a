use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Notify;

use gauntlet_protocol::{TestId, WorktreeId};
use gauntlet_vcs::WorktreeVcs;

use crate::lease::{LeaseStatus, WorktreeLease, WorktreeSnapshot};

const WORKTREE_DIR_PREFIX: &str = "wt-";
const WORKTREE_BRANCH_PREFIX: &str = "pool/";

/// Destroy+recreate attempts before a lease is dropped and the pool shrinks.
const RECYCLE_ATTEMPTS: u32 = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("worktree pool setup failed: {0}")]
    Setup(String),
    #[error("worktree pool is not initialized")]
    NotInitialized,
    #[error("worktree pool is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreePoolConfig {
    pub size: usize,
    pub base_dir: PathBuf,
    pub base_branch: String,
    pub preserve_failed_worktrees: bool,
}

impl WorktreePoolConfig {
    pub fn new(size: usize, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            size,
            base_dir: base_dir.into(),
            base_branch: "main".to_owned(),
            preserve_failed_worktrees: false,
        }
    }

    pub fn with_base_branch(mut self, base_branch: impl Into<String>) -> Self {
        self.base_branch = base_branch.into();
        self
    }

    pub fn with_preserve_failed_worktrees(mut self, preserve: bool) -> Self {
        self.preserve_failed_worktrees = preserve;
        self
    }
}

#[derive(Debug, Clone)]
struct LeaseRecord {
    path: PathBuf,
    branch: String,
    status: LeaseStatus,
    current_test: Option<TestId>,
    created_at: OffsetDateTime,
    last_used: Option<OffsetDateTime>,
}

impl LeaseRecord {
    fn lease(&self, id: &WorktreeId) -> WorktreeLease {
        WorktreeLease {
            id: id.clone(),
            path: self.path.clone(),
            branch: self.branch.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Default)]
struct PoolState {
    leases: BTreeMap<WorktreeId, LeaseRecord>,
    initialized: bool,
    closed: bool,
    warnings: Vec<String>,
}

struct PoolInner {
    vcs: Arc<dyn WorktreeVcs>,
    config: WorktreePoolConfig,
    state: Mutex<PoolState>,
    freed: Notify,
}

/// Fixed pool of isolated worktrees, each on a dedicated branch forked from
/// the configured base branch. Leases move `Free -> Busy` only inside
/// [`acquire`](WorktreePool::acquire) and back only inside
/// [`release`](WorktreePool::release); the shared object database is
/// append-only from the pool's perspective, which is what keeps N
/// concurrent executions from corrupting the repository.
#[derive(Clone)]
pub struct WorktreePool {
    inner: Arc<PoolInner>,
}

impl WorktreePool {
    pub fn new(config: WorktreePoolConfig, vcs: Arc<dyn WorktreeVcs>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                vcs,
                config,
                state: Mutex::new(PoolState::default()),
                freed: Notify::new(),
            }),
        }
    }

    fn branch_for(id: &WorktreeId) -> String {
        format!("{WORKTREE_BRANCH_PREFIX}{id}")
    }

    /// Create every worktree in the pool. Stale directories left by a
    /// crashed prior session are swept first; a creation failure rolls
    /// back everything already created and surfaces a setup error.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        {
            let state = self
                .inner
                .state
                .lock()
                .expect("worktree pool state lock poisoned");
            if state.closed {
                return Err(PoolError::Closed);
            }
            if state.initialized {
                tracing::warn!("worktree pool already initialized");
                return Ok(());
            }
        }

        if self.inner.config.size == 0 {
            return Err(PoolError::Setup(
                "worktree pool size must be at least one".to_owned(),
            ));
        }

        let base_dir = &self.inner.config.base_dir;
        fs::create_dir_all(base_dir).map_err(|error| {
            PoolError::Setup(format!(
                "failed to create worktree base directory '{}': {error}",
                base_dir.display()
            ))
        })?;

        self.sweep_stale_worktrees().await;

        tracing::info!(
            size = self.inner.config.size,
            base_dir = %base_dir.display(),
            "initializing worktree pool"
        );

        let mut created: Vec<(WorktreeId, LeaseRecord)> = Vec::new();
        for index in 1..=self.inner.config.size {
            let id = WorktreeId::new(format!("{WORKTREE_DIR_PREFIX}{index}"));
            let path = base_dir.join(id.as_str());
            let branch = Self::branch_for(&id);

            match self
                .inner
                .vcs
                .create_worktree(&path, &branch, &self.inner.config.base_branch)
                .await
            {
                Ok(()) => {
                    tracing::info!(worktree = %id, path = %path.display(), "created worktree");
                    created.push((
                        id,
                        LeaseRecord {
                            path,
                            branch,
                            status: LeaseStatus::Free,
                            current_test: None,
                            created_at: OffsetDateTime::now_utc(),
                            last_used: None,
                        },
                    ));
                }
                Err(error) => {
                    tracing::warn!(worktree = %id, %error, "worktree creation failed, rolling back pool");
                    for (created_id, record) in &created {
                        if let Err(rollback_error) = self
                            .inner
                            .vcs
                            .remove_worktree(&record.path, &record.branch)
                            .await
                        {
                            tracing::warn!(
                                worktree = %created_id,
                                error = %rollback_error,
                                "failed to roll back worktree"
                            );
                        }
                    }
                    return Err(PoolError::Setup(format!(
                        "failed to create worktree {id}: {error}"
                    )));
                }
            }
        }

        let mut state = self
            .inner
            .state
            .lock()
            .expect("worktree pool state lock poisoned");
        state.leases = created.into_iter().collect();
        state.initialized = true;
        Ok(())
    }

    /// Remove `wt-*` directories under the base dir that no live pool owns.
    async fn sweep_stale_worktrees(&self) {
        let entries = match fs::read_dir(&self.inner.config.base_dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(WORKTREE_DIR_PREFIX) {
                continue;
            }
            if !entry.path().is_dir() {
                continue;
            }

            let path = entry.path();
            let branch = format!("{WORKTREE_BRANCH_PREFIX}{name}");
            tracing::warn!(path = %path.display(), "removing stale worktree from prior session");
            if let Err(error) = self.inner.vcs.remove_worktree(&path, &branch).await {
                tracing::warn!(path = %path.display(), %error, "failed to remove stale worktree");
            }
        }
    }

    /// Hand the caller exclusive ownership of a free lease, waiting until
    /// one is released if all are busy. Never returns an `Error` lease.
    pub async fn acquire(&self, test: Option<TestId>) -> Result<WorktreeLease, PoolError> {
        loop {
            let notified = self.inner.freed.notified();
            {
                let mut state = self
                    .inner
                    .state
                    .lock()
                    .expect("worktree pool state lock poisoned");
                if state.closed {
                    drop(state);
                    // A single Notify permit cannot reach every waiter;
                    // each one woken on close passes the wake-up along.
                    self.inner.freed.notify_one();
                    return Err(PoolError::Closed);
                }
                if !state.initialized {
                    return Err(PoolError::NotInitialized);
                }

                let mut acquired = None;
                for (id, record) in state.leases.iter_mut() {
                    if record.status == LeaseStatus::Free {
                        record.status = LeaseStatus::Busy;
                        record.current_test = test.clone();
                        record.last_used = Some(OffsetDateTime::now_utc());
                        acquired = Some(record.lease(id));
                        break;
                    }
                }
                if let Some(lease) = acquired {
                    let more_free = state
                        .leases
                        .values()
                        .any(|record| record.status == LeaseStatus::Free);
                    drop(state);
                    if more_free {
                        // Concurrent releases store at most one permit, so a
                        // second parked waiter relies on this hand-off.
                        self.inner.freed.notify_one();
                    }
                    tracing::debug!(worktree = %lease.id, test = ?test, "acquired worktree lease");
                    return Ok(lease);
                }
            }
            notified.await;
        }
    }

    /// Return a lease to the pool. The worktree is reset to the pristine
    /// tip of its dedicated branch and integrity-probed before it becomes
    /// acquirable again; failures are absorbed here, never surfaced to the
    /// releasing worker.
    pub async fn release(&self, lease: WorktreeLease) {
        {
            let state = self
                .inner
                .state
                .lock()
                .expect("worktree pool state lock poisoned");
            if !state.leases.contains_key(&lease.id) {
                tracing::warn!(worktree = %lease.id, "attempted to release unknown lease");
                return;
            }
        }

        if self.reset_and_probe(&lease).await {
            self.mark_free(&lease.id);
            tracing::debug!(worktree = %lease.id, "released worktree lease");
            return;
        }

        if self.inner.config.preserve_failed_worktrees {
            self.park_for_diagnosis(&lease);
            return;
        }

        if self.recycle(&lease).await {
            tracing::warn!(worktree = %lease.id, "worktree recycled after reset failure");
            self.mark_free(&lease.id);
        } else {
            self.drop_lease(&lease);
        }
    }

    async fn reset_and_probe(&self, lease: &WorktreeLease) -> bool {
        if let Err(error) = self
            .inner
            .vcs
            .reset_worktree(&lease.path, &lease.branch)
            .await
        {
            tracing::warn!(worktree = %lease.id, %error, "worktree reset failed");
            return false;
        }

        match self.inner.vcs.integrity_check(&lease.path).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(worktree = %lease.id, "worktree failed integrity probe after reset");
                false
            }
            Err(error) => {
                tracing::warn!(worktree = %lease.id, %error, "worktree integrity probe errored");
                false
            }
        }
    }

    async fn recycle(&self, lease: &WorktreeLease) -> bool {
        for attempt in 1..=RECYCLE_ATTEMPTS {
            if let Err(error) = self
                .inner
                .vcs
                .remove_worktree(&lease.path, &lease.branch)
                .await
            {
                tracing::warn!(worktree = %lease.id, attempt, %error, "recycle removal failed");
                continue;
            }
            match self
                .inner
                .vcs
                .create_worktree(&lease.path, &lease.branch, &self.inner.config.base_branch)
                .await
            {
                Ok(()) => return true,
                Err(error) => {
                    tracing::warn!(worktree = %lease.id, attempt, %error, "recycle recreation failed");
                }
            }
        }
        false
    }

    fn mark_free(&self, id: &WorktreeId) {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("worktree pool state lock poisoned");
        if let Some(record) = state.leases.get_mut(id) {
            record.status = LeaseStatus::Free;
            record.current_test = None;
            record.last_used = Some(OffsetDateTime::now_utc());
        }
        drop(state);
        self.inner.freed.notify_one();
    }

    fn park_for_diagnosis(&self, lease: &WorktreeLease) {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("worktree pool state lock poisoned");
        if let Some(record) = state.leases.get_mut(&lease.id) {
            record.status = LeaseStatus::Error;
            record.current_test = None;
        }
        state.warnings.push(format!(
            "worktree {} failed reset and was preserved for diagnosis at {}",
            lease.id,
            lease.path.display()
        ));
        tracing::warn!(worktree = %lease.id, path = %lease.path.display(), "worktree preserved for diagnosis");
    }

    fn drop_lease(&self, lease: &WorktreeLease) {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("worktree pool state lock poisoned");
        state.leases.remove(&lease.id);
        let remaining = state.leases.len();
        state.warnings.push(format!(
            "worktree {} dropped after repeated reset failures; pool capacity reduced to {remaining}",
            lease.id
        ));
        tracing::warn!(worktree = %lease.id, remaining, "worktree dropped, pool capacity reduced");
    }

    /// Wake blocked acquirers and refuse further acquisitions. Worktrees
    /// on disk are left for [`cleanup`](WorktreePool::cleanup).
    pub fn close(&self) {
        {
            let mut state = self
                .inner
                .state
                .lock()
                .expect("worktree pool state lock poisoned");
            state.closed = true;
        }
        self.inner.freed.notify_waiters();
        // Covers an acquirer that read the open state but has not parked yet.
        self.inner.freed.notify_one();
    }

    /// Remove every worktree and its branch. Idempotent and best-effort:
    /// removal failures are logged, not raised.
    pub async fn cleanup(&self) {
        let drained: Vec<(WorktreeId, LeaseRecord)> = {
            let mut state = self
                .inner
                .state
                .lock()
                .expect("worktree pool state lock poisoned");
            state.closed = true;
            state.initialized = false;
            std::mem::take(&mut state.leases).into_iter().collect()
        };
        self.inner.freed.notify_waiters();
        self.inner.freed.notify_one();

        for (id, record) in drained {
            if record.status == LeaseStatus::Error && self.inner.config.preserve_failed_worktrees {
                tracing::warn!(
                    worktree = %id,
                    path = %record.path.display(),
                    "leaving preserved worktree in place during cleanup"
                );
                continue;
            }
            if let Err(error) = self
                .inner
                .vcs
                .remove_worktree(&record.path, &record.branch)
                .await
            {
                tracing::warn!(worktree = %id, %error, "failed to remove worktree during cleanup");
            }
        }

        // Drops the base dir only once the last worktree is gone.
        let _ = fs::remove_dir(&self.inner.config.base_dir);
        tracing::info!("worktree pool cleanup complete");
    }

    pub fn status_snapshot(&self) -> Vec<WorktreeSnapshot> {
        let state = self
            .inner
            .state
            .lock()
            .expect("worktree pool state lock poisoned");
        state
            .leases
            .iter()
            .map(|(id, record)| WorktreeSnapshot {
                id: id.clone(),
                path: record.path.clone(),
                branch: record.branch.clone(),
                status: record.status,
                current_test: record.current_test.clone(),
                created_at: record.created_at,
                last_used: record.last_used,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        let state = self
            .inner
            .state
            .lock()
            .expect("worktree pool state lock poisoned");
        state.warnings.clone()
    }

    pub fn capacity(&self) -> usize {
        self.count_by(|_| true)
    }

    pub fn free_count(&self) -> usize {
        self.count_by(|status| status == LeaseStatus::Free)
    }

    pub fn busy_count(&self) -> usize {
        self.count_by(|status| status == LeaseStatus::Busy)
    }

    pub fn error_count(&self) -> usize {
        self.count_by(|status| status == LeaseStatus::Error)
    }

    fn count_by(&self, predicate: impl Fn(LeaseStatus) -> bool) -> usize {
        let state = self
            .inner
            .state
            .lock()
            .expect("worktree pool state lock poisoned");
        state
            .leases
            .values()
            .filter(|record| predicate(record.status))
            .count()
    }
}
