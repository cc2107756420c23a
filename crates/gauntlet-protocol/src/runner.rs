use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::request::{BatchRange, RunnerConfig};
use crate::result::AttemptStatus;

/// Arguments for one runner attempt. The worktree path is the only part of
/// the execution environment the core contributes; everything else is
/// relayed from the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerInvocation {
    pub worktree_path: PathBuf,
    pub plan_path: PathBuf,
    pub batch_range: BatchRange,
    pub config: RunnerConfig,
}

/// Structured outcome returned by the external runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerResult {
    pub status: AttemptStatus,
    pub tasks_passed: u32,
    pub tasks_failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunnerResult {
    pub fn complete(tasks_passed: u32, tasks_failed: u32) -> Self {
        Self {
            status: AttemptStatus::Complete,
            tasks_passed,
            tasks_failed,
            report_path: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: AttemptStatus::Failed,
            tasks_passed: 0,
            tasks_failed: 0,
            report_path: None,
            error: Some(error.into()),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: AttemptStatus::Error,
            tasks_passed: 0,
            tasks_failed: 0,
            report_path: None,
            error: Some(error.into()),
        }
    }

    pub fn with_report_path(mut self, report_path: impl Into<String>) -> Self {
        self.report_path = Some(report_path.into());
        self
    }
}

/// The external test runner. Implementations must be re-entrant: the core
/// issues several concurrent calls against distinct worktrees.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, invocation: RunnerInvocation) -> RunnerResult;
}
