use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::ids::TestId;

const DEFAULT_TASK_TIMEOUT_SECONDS: u64 = 180;

/// Batch selector forwarded to the test runner. The core interprets nothing
/// beyond this selector; plans and batches stay opaque payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum BatchRange {
    #[default]
    All,
    Range {
        start: u32,
        end: u32,
    },
}

impl BatchRange {
    pub fn range(start: u32, end: u32) -> Result<Self, BatchRangeError> {
        if start == 0 {
            return Err(BatchRangeError::Invalid(
                "batch numbers are one-based".to_owned(),
            ));
        }
        if end < start {
            return Err(BatchRangeError::Invalid(format!(
                "batch range end {end} precedes start {start}"
            )));
        }
        Ok(Self::Range { start, end })
    }

    pub fn single(batch: u32) -> Result<Self, BatchRangeError> {
        Self::range(batch, batch)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchRangeError {
    #[error("invalid batch range: {0}")]
    Invalid(String),
}

impl fmt::Display for BatchRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Range { start, end } if start == end => write!(f, "{start}"),
            Self::Range { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

impl FromStr for BatchRange {
    type Err = BatchRangeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let parse_bound = |bound: &str| {
            bound.trim().parse::<u32>().map_err(|_| {
                BatchRangeError::Invalid(format!(
                    "batch range '{value}' must be 'all', a batch number, or 'start-end'"
                ))
            })
        };

        match value.split_once('-') {
            Some((start, end)) => Self::range(parse_bound(start)?, parse_bound(end)?),
            None => Self::single(parse_bound(value)?),
        }
    }
}

impl From<BatchRange> for String {
    fn from(value: BatchRange) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for BatchRange {
    type Error = BatchRangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Per-request runner configuration. Everything except `task_timeout_seconds`
/// is forwarded to the external runner untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_task_timeout_seconds")]
    pub task_timeout_seconds: u64,
    #[serde(default)]
    pub auto_merge: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_task_timeout_seconds() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECONDS
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            task_timeout_seconds: DEFAULT_TASK_TIMEOUT_SECONDS,
            auto_merge: false,
            extra: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }
}

/// One unit of work: a plan (or slice of one) to execute in an isolated
/// worktree. Mutated only by the queue, and there only to advance
/// `retry_count` on re-enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRequest {
    pub id: TestId,
    pub plan_path: PathBuf,
    #[serde(default)]
    pub batch_range: BatchRange,
    #[serde(default)]
    pub config: RunnerConfig,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TestRequest {
    pub fn new(id: impl Into<TestId>, plan_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            plan_path: plan_path.into(),
            batch_range: BatchRange::All,
            config: RunnerConfig::default(),
            priority: 0,
            retry_count: 0,
            max_retries: 0,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_batch_range(mut self, batch_range: BatchRange) -> Self {
        self.batch_range = batch_range;
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
