use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VcsError {
    #[error("vcs configuration error: {0}")]
    Configuration(String),
    #[error("vcs dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

/// Worktree operations the pool needs from a version-control system.
///
/// The pool is agnostic to the implementation; the contract is that
/// worktrees created through this trait share one object database while
/// keeping fully independent working directories and refs.
#[async_trait]
pub trait WorktreeVcs: Send + Sync {
    /// Fail-fast probe that the underlying VCS tooling is usable.
    async fn health_check(&self) -> Result<(), VcsError>;

    /// Create a worktree at `path` on a fresh dedicated `branch` forked
    /// from `base_branch`. A stale branch of the same name left by a
    /// crashed session is replaced, not an error.
    async fn create_worktree(
        &self,
        path: &Path,
        branch: &str,
        base_branch: &str,
    ) -> Result<(), VcsError>;

    /// Remove the worktree at `path` and delete its dedicated `branch`.
    /// Best-effort and idempotent: a missing worktree is not an error.
    async fn remove_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError>;

    /// Restore the worktree at `path` to the pristine tip of `branch`,
    /// discarding every tracked and untracked change.
    async fn reset_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError>;

    /// Probe the worktree for repository damage. `Ok(false)` means the
    /// probe ran and found the worktree unusable; `Err` means the probe
    /// itself could not run.
    async fn integrity_check(&self, path: &Path) -> Result<bool, VcsError>;
}
