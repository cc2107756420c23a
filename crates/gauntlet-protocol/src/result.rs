use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::{TestId, WorkerId, WorktreeId};

/// Outcome classification of one execution attempt.
///
/// `Failed` is a test-level failure reported by the runner; `Error` covers
/// infrastructure problems (runner exceptions, timeouts, lease failures).
/// Both feed the same retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Complete,
    Failed,
    Error,
}

impl AttemptStatus {
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Outcome of one execution attempt of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub request_id: TestId,
    pub worktree_id: WorktreeId,
    pub worker_id: WorkerId,
    pub status: AttemptStatus,
    pub tasks_passed: u32,
    pub tasks_failed: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
}

impl TestResult {
    pub fn duration_seconds(&self) -> f64 {
        (self.completed_at - self.started_at).as_seconds_f64()
    }
}
