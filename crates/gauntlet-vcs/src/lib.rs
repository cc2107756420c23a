//! Version-control driver for the gauntlet worktree pool.
//!
//! The pool consumes the [`WorktreeVcs`] capability trait; the only
//! provider shipped here drives the `git` CLI. Command execution goes
//! through an injectable [`CommandRunner`] so tests run against stubbed
//! process output.

pub mod git_cli;
pub mod interface;

pub use git_cli::{CommandRunner, GitCliConfig, GitCliWorktreeVcs, ProcessCommandRunner};
pub use interface::{VcsError, WorktreeVcs};
