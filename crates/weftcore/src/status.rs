use serde::{Deserialize, Serialize};

/// Per-execution state of one vertex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VertexStatus {
    Pending,
    Running,
    Completed,
    /// On an inactive branch
    Skipped,
    Failed { reason: String },
    Cancelled,
}

impl VertexStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VertexStatus::Pending | VertexStatus::Running)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, VertexStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    Failed { reason: String },
    Cancelled,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed)
    }
}
