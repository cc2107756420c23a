use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::SessionId;
use crate::result::TestResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Complete,
    PartialSuccess,
    Failed,
    NoTests,
    Running,
}

impl SessionStatus {
    /// Derive the session status from terminal counts. The caller decides
    /// when the session is terminal; counts alone carry the classification.
    pub fn derive(total: usize, completed: usize, failed: usize) -> Self {
        if total == 0 {
            Self::NoTests
        } else if failed == 0 && completed == total {
            Self::Complete
        } else if completed > 0 && failed > 0 {
            Self::PartialSuccess
        } else if completed == 0 && failed == total {
            Self::Failed
        } else {
            Self::Running
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Aggregate report for one orchestrator session. Pool degradation
/// (recycled or dropped leases) surfaces through `warnings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelTestReport {
    pub session_id: SessionId,
    pub status: SessionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
    pub duration_seconds: f64,
    pub num_workers: usize,
    pub total_tests: usize,
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub success_rate: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub results: Vec<TestResult>,
}

impl ParallelTestReport {
    pub fn success_rate_for(passed: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            passed as f64 * 100.0 / total as f64
        }
    }
}
