use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{CommandRunner, GitCliConfig, GitCliWorktreeVcs, ProcessCommandRunner};
use crate::interface::{VcsError, WorktreeVcs};

struct StubRunner {
    calls: Mutex<Vec<(String, Vec<OsString>)>>,
    results: Mutex<VecDeque<io::Result<std::process::Output>>>,
}

impl StubRunner {
    fn with_results(results: Vec<io::Result<std::process::Output>>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::from(results)),
        }
    }

    fn recorded_calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .map(|(_, args)| {
                args.iter()
                    .map(|arg| arg.to_string_lossy().to_string())
                    .collect()
            })
            .collect()
    }
}

impl CommandRunner for StubRunner {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<std::process::Output> {
        self.calls
            .lock()
            .expect("lock")
            .push((program.to_owned(), args.to_vec()));

        self.results
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Ok(success_output()))
    }
}

struct TempDir {
    path: PathBuf,
}

impl TempDir {
    fn new(label: &str) -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "gauntlet-{label}-{}-{stamp}",
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

fn output_with_status(code: i32, stdout: &[u8], stderr: &[u8]) -> std::process::Output {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        std::process::Output {
            status: std::process::ExitStatus::from_raw(code),
            stdout: stdout.to_vec(),
            stderr: stderr.to_vec(),
        }
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::ExitStatusExt;
        std::process::Output {
            status: std::process::ExitStatus::from_raw(code as u32),
            stdout: stdout.to_vec(),
            stderr: stderr.to_vec(),
        }
    }
}

fn success_output() -> std::process::Output {
    output_with_status(0, &[], &[])
}

fn failure_output(stderr: &[u8]) -> std::process::Output {
    output_with_status(256, &[], stderr)
}

fn provider_with(runner: StubRunner, repo_root: PathBuf) -> GitCliWorktreeVcs<StubRunner> {
    GitCliWorktreeVcs::new(runner, PathBuf::from("git"), repo_root).expect("construct provider")
}

#[tokio::test]
async fn health_check_runs_version_probe() {
    let provider = provider_with(
        StubRunner::with_results(vec![Ok(success_output())]),
        PathBuf::from("/repo"),
    );
    provider.health_check().await.expect("health check");

    let calls = provider.runner.recorded_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], vec!["--version"]);
}

#[tokio::test]
async fn create_worktree_deletes_stale_branch_then_adds_from_base() {
    let scratch = TempDir::new("vcs-create");
    let worktree_path = scratch.path.join("wt-1");
    let provider = provider_with(
        StubRunner::with_results(vec![
            Ok(failure_output(b"error: branch 'pool/wt-1' not found.")),
            Ok(success_output()),
        ]),
        scratch.path.clone(),
    );

    provider
        .create_worktree(&worktree_path, "pool/wt-1", "main")
        .await
        .expect("create worktree");

    let calls = provider.runner.recorded_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0][2..], ["branch", "-D", "pool/wt-1"]);
    assert_eq!(
        calls[1][2..],
        [
            "worktree",
            "add",
            "-b",
            "pool/wt-1",
            worktree_path.to_string_lossy().as_ref(),
            "main",
        ]
    );
}

#[tokio::test]
async fn create_worktree_falls_back_to_existing_branch_after_prune() {
    let scratch = TempDir::new("vcs-create-existing");
    let worktree_path = scratch.path.join("wt-2");
    let provider = provider_with(
        StubRunner::with_results(vec![
            Ok(success_output()),
            Ok(failure_output(
                b"fatal: a branch named 'pool/wt-2' already exists",
            )),
            Ok(success_output()),
            Ok(success_output()),
        ]),
        scratch.path.clone(),
    );

    provider
        .create_worktree(&worktree_path, "pool/wt-2", "main")
        .await
        .expect("create worktree with fallback");

    let calls = provider.runner.recorded_calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[2][2..], ["worktree", "prune"]);
    assert_eq!(
        calls[3][2..],
        [
            "worktree",
            "add",
            worktree_path.to_string_lossy().as_ref(),
            "pool/wt-2",
        ]
    );
}

#[tokio::test]
async fn create_worktree_rejects_blank_branch() {
    let provider = provider_with(StubRunner::with_results(Vec::new()), PathBuf::from("/repo"));

    let error = provider
        .create_worktree(&PathBuf::from("/tmp/wt"), "  ", "main")
        .await
        .expect_err("blank branch must be rejected");
    assert!(matches!(error, VcsError::Configuration(_)));
}

#[tokio::test]
async fn reset_worktree_wipes_tree_then_restores_branch_tip() {
    let scratch = TempDir::new("vcs-reset");
    let worktree_path = scratch.path.join("wt-1");
    fs::create_dir_all(worktree_path.join("src")).expect("worktree src dir");
    fs::write(worktree_path.join(".git"), "gitdir: /repo/.git/worktrees/wt-1")
        .expect("git link file");
    fs::write(worktree_path.join("scratch.log"), "leftover").expect("leftover file");

    let provider = provider_with(
        StubRunner::with_results(vec![Ok(success_output()), Ok(success_output())]),
        scratch.path.clone(),
    );

    provider
        .reset_worktree(&worktree_path, "pool/wt-1")
        .await
        .expect("reset worktree");

    assert!(worktree_path.join(".git").exists());
    assert!(!worktree_path.join("src").exists());
    assert!(!worktree_path.join("scratch.log").exists());

    let calls = provider.runner.recorded_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0][2..], ["checkout", "-f", "pool/wt-1"]);
    assert_eq!(calls[1][2..], ["reset", "--hard"]);
}

#[tokio::test]
async fn integrity_check_reports_unusable_on_dirty_status() {
    let provider = provider_with(
        StubRunner::with_results(vec![Ok(output_with_status(0, b" M src/main.rs\n", &[]))]),
        PathBuf::from("/repo"),
    );

    let healthy = provider
        .integrity_check(&PathBuf::from("/repo/wt-1"))
        .await
        .expect("integrity probe");
    assert!(!healthy);
}

#[tokio::test]
async fn integrity_check_reports_unusable_on_fsck_failure() {
    let provider = provider_with(
        StubRunner::with_results(vec![
            Ok(success_output()),
            Ok(failure_output(b"error: object file is empty")),
        ]),
        PathBuf::from("/repo"),
    );

    let healthy = provider
        .integrity_check(&PathBuf::from("/repo/wt-1"))
        .await
        .expect("integrity probe");
    assert!(!healthy);
}

#[tokio::test]
async fn integrity_check_passes_clean_worktree() {
    let provider = provider_with(
        StubRunner::with_results(vec![Ok(success_output()), Ok(success_output())]),
        PathBuf::from("/repo"),
    );

    let healthy = provider
        .integrity_check(&PathBuf::from("/repo/wt-1"))
        .await
        .expect("integrity probe");
    assert!(healthy);
}

#[tokio::test]
async fn remove_worktree_tolerates_missing_directory() {
    let scratch = TempDir::new("vcs-remove-missing");
    let provider = provider_with(
        StubRunner::with_results(vec![Ok(success_output()), Ok(success_output())]),
        scratch.path.clone(),
    );

    provider
        .remove_worktree(&scratch.path.join("wt-gone"), "pool/wt-gone")
        .await
        .expect("remove of missing worktree");

    let calls = provider.runner.recorded_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0][2..], ["worktree", "prune"]);
    assert_eq!(calls[1][2..], ["branch", "-D", "pool/wt-gone"]);
}

#[tokio::test]
async fn remove_worktree_falls_back_to_directory_removal() {
    let scratch = TempDir::new("vcs-remove-fallback");
    let worktree_path = scratch.path.join("wt-1");
    fs::create_dir_all(&worktree_path).expect("worktree dir");

    let provider = provider_with(
        StubRunner::with_results(vec![
            Ok(failure_output(b"fatal: not a working tree")),
            Ok(success_output()),
            Ok(success_output()),
        ]),
        scratch.path.clone(),
    );

    provider
        .remove_worktree(&worktree_path, "pool/wt-1")
        .await
        .expect("remove worktree");
    assert!(!worktree_path.exists());
}

#[test]
fn constructor_rejects_empty_binary_and_root() {
    assert!(matches!(
        GitCliWorktreeVcs::new(
            ProcessCommandRunner,
            PathBuf::new(),
            PathBuf::from("/repo")
        ),
        Err(VcsError::Configuration(_))
    ));
    assert!(matches!(
        GitCliWorktreeVcs::new(ProcessCommandRunner, PathBuf::from("git"), PathBuf::new()),
        Err(VcsError::Configuration(_))
    ));
}

#[test]
fn from_config_uses_default_git_binary() {
    let provider =
        GitCliWorktreeVcs::from_config(GitCliConfig::new("/repo")).expect("provider from config");
    assert_eq!(provider.repo_root(), PathBuf::from("/repo").as_path());
}
