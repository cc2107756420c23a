//! Execution workers and the parallel orchestrator.
//!
//! A session wires a [`gauntlet_queue::TestQueue`], a
//! [`gauntlet_pool::WorktreePool`], and `num_workers` long-lived
//! [`ExecutionWorker`]s together, runs submitted test plans concurrently
//! against isolated worktrees, and aggregates the outcomes into a
//! [`gauntlet_protocol::ParallelTestReport`].

pub mod orchestrator;
pub mod worker;

pub use orchestrator::{
    OrchestratorError, OrchestratorStatus, ParallelOrchestrator, ParallelOrchestratorConfig,
};
pub use worker::ExecutionWorker;
