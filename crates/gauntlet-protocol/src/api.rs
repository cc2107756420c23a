//! Submission-surface value shapes. The core exposes no HTTP server; these
//! records give a transport layer stable JSON forms to build on.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::report::{ParallelTestReport, SessionStatus};
use crate::request::{BatchRange, RunnerConfig};
use crate::result::TestResult;
use crate::status::WorkerStatusSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSubmission {
    pub plan_path: PathBuf,
    #[serde(default)]
    pub batch_range: BatchRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub plans: Vec<PlanSubmission>,
    pub num_workers: usize,
    #[serde(default)]
    pub config: RunnerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub num_workers: usize,
    pub tests_queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionProgress {
    pub total: usize,
    pub completed: usize,
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub progress: SessionProgress,
    pub workers: Vec<WorkerStatusSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResultsResponse {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub duration_seconds: f64,
    pub summary: ResultsSummary,
    pub results: Vec<TestResult>,
}

impl From<&ParallelTestReport> for SessionResultsResponse {
    fn from(report: &ParallelTestReport) -> Self {
        Self {
            session_id: report.session_id.clone(),
            status: report.status,
            duration_seconds: report.duration_seconds,
            summary: ResultsSummary {
                total: report.total_tests,
                passed: report.tests_passed,
                failed: report.tests_failed,
            },
            results: report.results.clone(),
        }
    }
}
