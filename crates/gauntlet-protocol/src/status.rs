use serde::{Deserialize, Serialize};

use crate::ids::{TestId, WorkerId, WorktreeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Idle,
    Fetching,
    Leasing,
    Running,
    Finalising,
    Stopped,
}

impl WorkerState {
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Point-in-time view of one worker, cheap to take and serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatusSnapshot {
    pub worker_id: WorkerId,
    pub state: WorkerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_test: Option<TestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_worktree: Option<WorktreeId>,
}
