//! Shared value records and capability interfaces for the gauntlet
//! parallel test-plan execution core.
//!
//! Everything here is transport-agnostic: plain serde records plus the
//! traits the orchestrator expects its external collaborators (plan
//! parser, test runner) to implement.

pub mod api;
pub mod ids;
pub mod plan;
pub mod report;
pub mod request;
pub mod result;
pub mod runner;
pub mod status;

pub use ids::{SessionId, TestId, WorkerId, WorktreeId};
pub use plan::{PlanError, PlanParser, TestPlan};
pub use report::{ParallelTestReport, SessionStatus};
pub use request::{BatchRange, BatchRangeError, RunnerConfig, TestRequest};
pub use result::{AttemptStatus, TestResult};
pub use runner::{RunnerInvocation, RunnerResult, TestRunner};
pub use status::{WorkerState, WorkerStatusSnapshot};
