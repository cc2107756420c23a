use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A fully-materialised test plan. The execution core never looks inside
/// `payload`; batches and tasks are the runner's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    pub path: PathBuf,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan source unavailable: {0}")]
    Unavailable(String),
    #[error("plan is malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait PlanParser: Send + Sync {
    async fn parse(&self, plan_path: &Path) -> Result<TestPlan, PlanError>;
}
