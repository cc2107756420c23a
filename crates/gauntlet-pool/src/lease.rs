use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use gauntlet_protocol::{TestId, WorktreeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Free,
    Busy,
    Error,
}

/// Exclusive handle on one worktree, held by at most one worker between
/// `acquire` and `release`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeLease {
    pub id: WorktreeId,
    pub path: PathBuf,
    pub branch: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Point-in-time view of one pool slot for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeSnapshot {
    pub id: WorktreeId,
    pub path: PathBuf,
    pub branch: String,
    pub status: LeaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_test: Option<TestId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_used: Option<OffsetDateTime>,
}
