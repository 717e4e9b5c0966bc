use serde::{Deserialize, Serialize};

use crate::Urn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    PreRunning,
    Running,
    Success,
    Error,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Error | TaskStatus::Aborted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::PreRunning => "preRunning",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
            TaskStatus::Aborted => "aborted",
        }
    }
}

/// Asynchronous remote operation reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Urn,
    /// Operation name as reported by the remote, e.g. `vappUndeployPowerOff`.
    pub operation: String,
    /// Object the task operates on.
    pub owner: Option<Urn>,
    pub status: TaskStatus,
    /// Percentage for long-running uploads; absent for most operations.
    pub progress: Option<u8>,
    /// Object created by the task, when it created one.
    pub result: Option<Urn>,
    pub error: Option<String>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
