use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;

use crate::interface::{VcsError, WorktreeVcs};

/// Process-spawning seam so tests can stub command output.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<std::process::Output> {
        Command::new(program).args(args).output()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCliConfig {
    pub binary: PathBuf,
    pub repo_root: PathBuf,
}

impl GitCliConfig {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from("git"),
            repo_root: repo_root.into(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }
}

/// `WorktreeVcs` implementation driving the `git` CLI against one shared
/// repository. All mutating commands run either `-C repo_root` (worktree
/// bookkeeping, branch deletion) or `-C worktree_path` (reset), so two
/// providers over distinct worktrees never contend on working-tree state.
pub struct GitCliWorktreeVcs<R: CommandRunner = ProcessCommandRunner> {
    runner: R,
    binary: PathBuf,
    repo_root: PathBuf,
}

impl GitCliWorktreeVcs<ProcessCommandRunner> {
    pub fn from_config(config: GitCliConfig) -> Result<Self, VcsError> {
        Self::new(ProcessCommandRunner, config.binary, config.repo_root)
    }
}

impl<R: CommandRunner> GitCliWorktreeVcs<R> {
    pub fn new(runner: R, binary: PathBuf, repo_root: PathBuf) -> Result<Self, VcsError> {
        if binary.as_os_str().is_empty() {
            return Err(VcsError::Configuration(
                "git binary path must be non-empty".to_owned(),
            ));
        }
        if repo_root.as_os_str().is_empty() {
            return Err(VcsError::Configuration(
                "repository root must be non-empty".to_owned(),
            ));
        }

        Ok(Self {
            runner,
            binary,
            repo_root,
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn health_check_args() -> Vec<OsString> {
        vec![OsString::from("--version")]
    }

    fn run_git_raw(&self, args: &[OsString]) -> Result<std::process::Output, VcsError> {
        let program = self
            .binary
            .to_str()
            .ok_or_else(|| VcsError::Configuration("invalid git binary path".to_owned()))?;
        self.runner
            .run(program, args)
            .map_err(|error| match error.kind() {
                io::ErrorKind::NotFound => VcsError::DependencyUnavailable(format!(
                    "git CLI `{}` was not found; install git or configure a valid binary path",
                    self.binary.display()
                )),
                _ => VcsError::DependencyUnavailable(format!(
                    "failed to execute git CLI `{}`: {error}",
                    self.binary.display()
                )),
            })
    }

    fn run_git(&self, args: &[OsString]) -> Result<std::process::Output, VcsError> {
        let output = self.run_git_raw(args)?;
        if output.status.success() {
            return Ok(output);
        }

        Err(self.command_failed(args, &output))
    }

    fn command_failed(&self, args: &[OsString], output: &std::process::Output) -> VcsError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        let detail = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            format!("exit status {}", output.status)
        };
        let rendered_args = args
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ");

        VcsError::DependencyUnavailable(format!(
            "git command failed (`{} {rendered_args}`): {detail}",
            self.binary.display()
        ))
    }

    fn create_worktree_args(&self, path: &Path, branch: &str, base_branch: &str) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            self.repo_root.as_os_str().to_owned(),
            OsString::from("worktree"),
            OsString::from("add"),
            OsString::from("-b"),
            OsString::from(branch),
            path.as_os_str().to_owned(),
            OsString::from(base_branch),
        ]
    }

    fn create_worktree_existing_branch_args(&self, path: &Path, branch: &str) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            self.repo_root.as_os_str().to_owned(),
            OsString::from("worktree"),
            OsString::from("add"),
            path.as_os_str().to_owned(),
            OsString::from(branch),
        ]
    }

    fn remove_worktree_args(&self, path: &Path) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            self.repo_root.as_os_str().to_owned(),
            OsString::from("worktree"),
            OsString::from("remove"),
            OsString::from("--force"),
            path.as_os_str().to_owned(),
        ]
    }

    fn worktree_prune_args(&self) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            self.repo_root.as_os_str().to_owned(),
            OsString::from("worktree"),
            OsString::from("prune"),
        ]
    }

    fn delete_branch_args(&self, branch: &str) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            self.repo_root.as_os_str().to_owned(),
            OsString::from("branch"),
            OsString::from("-D"),
            OsString::from(branch),
        ]
    }

    fn checkout_branch_args(path: &Path, branch: &str) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            path.as_os_str().to_owned(),
            OsString::from("checkout"),
            OsString::from("-f"),
            OsString::from(branch),
        ]
    }

    fn reset_hard_args(path: &Path) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            path.as_os_str().to_owned(),
            OsString::from("reset"),
            OsString::from("--hard"),
        ]
    }

    fn status_porcelain_args(path: &Path) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            path.as_os_str().to_owned(),
            OsString::from("status"),
            OsString::from("--porcelain"),
        ]
    }

    fn fsck_args(path: &Path) -> Vec<OsString> {
        vec![
            OsString::from("-C"),
            path.as_os_str().to_owned(),
            OsString::from("fsck"),
            OsString::from("--no-progress"),
        ]
    }

    fn is_branch_already_exists_error(error: &VcsError) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("already exists")
    }

    fn ensure_worktree_parent_exists(path: &Path) -> Result<(), VcsError> {
        let parent = path.parent().ok_or_else(|| {
            VcsError::Configuration(format!(
                "worktree path '{}' has no parent directory",
                path.display()
            ))
        })?;

        fs::create_dir_all(parent).map_err(|error| {
            VcsError::Configuration(format!(
                "failed to create parent directory '{}' for worktree: {error}",
                parent.display()
            ))
        })
    }

    /// Wipe every entry under the worktree except the `.git` link so a
    /// subsequent hard reset recreates the tree from the branch tip.
    fn clear_working_tree(path: &Path) -> Result<(), VcsError> {
        let entries = fs::read_dir(path).map_err(|error| {
            VcsError::DependencyUnavailable(format!(
                "failed to read worktree '{}' for reset: {error}",
                path.display()
            ))
        })?;

        for entry in entries {
            let entry = entry.map_err(|error| {
                VcsError::DependencyUnavailable(format!(
                    "failed to inspect entry under '{}': {error}",
                    path.display()
                ))
            })?;
            if entry.file_name() == ".git" {
                continue;
            }

            let entry_path = entry.path();
            let removal = if entry_path.is_dir() {
                fs::remove_dir_all(&entry_path)
            } else {
                fs::remove_file(&entry_path)
            };
            removal.map_err(|error| {
                VcsError::DependencyUnavailable(format!(
                    "failed to remove '{}' during worktree reset: {error}",
                    entry_path.display()
                ))
            })?;
        }

        Ok(())
    }

    fn remove_directory_remnant(path: &Path) -> Result<(), VcsError> {
        if !path.exists() {
            return Ok(());
        }

        fs::remove_dir_all(path).map_err(|error| {
            VcsError::DependencyUnavailable(format!(
                "failed to remove worktree directory '{}': {error}",
                path.display()
            ))
        })
    }
}

#[async_trait]
impl<R: CommandRunner> WorktreeVcs for GitCliWorktreeVcs<R> {
    async fn health_check(&self) -> Result<(), VcsError> {
        self.run_git(&Self::health_check_args())?;
        Ok(())
    }

    async fn create_worktree(
        &self,
        path: &Path,
        branch: &str,
        base_branch: &str,
    ) -> Result<(), VcsError> {
        if branch.trim().is_empty() {
            return Err(VcsError::Configuration(
                "worktree branch must be a non-empty string".to_owned(),
            ));
        }
        Self::ensure_worktree_parent_exists(path)?;

        // A branch left over from a crashed session shadows the fork point.
        let _ = self.run_git(&self.delete_branch_args(branch));

        let args = self.create_worktree_args(path, branch, base_branch);
        if let Err(error) = self.run_git(&args) {
            if !Self::is_branch_already_exists_error(&error) {
                return Err(error);
            }

            let _ = self.run_git(&self.worktree_prune_args());
            self.run_git(&self.create_worktree_existing_branch_args(path, branch))?;
        }

        Ok(())
    }

    async fn remove_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError> {
        if path.exists() {
            if let Err(error) = self.run_git(&self.remove_worktree_args(path)) {
                tracing::debug!(
                    path = %path.display(),
                    %error,
                    "git worktree remove failed, falling back to directory removal"
                );
            }
            Self::remove_directory_remnant(path)?;
        }

        let _ = self.run_git(&self.worktree_prune_args());
        let _ = self.run_git(&self.delete_branch_args(branch));

        Ok(())
    }

    async fn reset_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError> {
        Self::clear_working_tree(path)?;
        self.run_git(&Self::checkout_branch_args(path, branch))?;
        self.run_git(&Self::reset_hard_args(path))?;
        Ok(())
    }

    async fn integrity_check(&self, path: &Path) -> Result<bool, VcsError> {
        let status_output = self.run_git_raw(&Self::status_porcelain_args(path))?;
        if !status_output.status.success() {
            return Ok(false);
        }
        if !String::from_utf8_lossy(&status_output.stdout)
            .trim()
            .is_empty()
        {
            return Ok(false);
        }

        let fsck_output = self.run_git_raw(&Self::fsck_args(path))?;
        Ok(fsck_output.status.success())
    }
}

#[cfg(test)]
mod tests;
