//! Task domain model.
//!
//! A Task is the unit of user intent submitted to `Orchestrator::run`. It is
//! created once by the orchestrator and only the orchestrator ever mutates
//! its status (ownership rule in spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::ValidationError;

/// What kind of change the user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Feature,
    Bugfix,
    Refactor,
    Research,
}

impl Default for TaskType {
    fn default() -> Self {
        Self::Feature
    }
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bugfix => "bugfix",
            Self::Refactor => "refactor",
            Self::Research => "research",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "feature" => Some(Self::Feature),
            "bugfix" => Some(Self::Bugfix),
            "refactor" => Some(Self::Refactor),
            "research" => Some(Self::Research),
            _ => None,
        }
    }
}

/// Lattice position of a Task (I4: progresses only forward).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Decomposing,
    Executing,
    Aggregating,
    Completed,
    Failed,
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Decomposing => "decomposing",
            Self::Executing => "executing",
            Self::Aggregating => "aggregating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "decomposing" => Some(Self::Decomposing),
            "executing" => Some(Self::Executing),
            "aggregating" => Some(Self::Aggregating),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid forward transitions from this status (I4: the lattice is a
    /// straight line save for the three terminal branches).
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Decomposing, Self::Cancelled],
            Self::Decomposing => &[Self::Executing, Self::Failed, Self::Cancelled],
            Self::Executing => &[Self::Aggregating, Self::Failed, Self::Cancelled],
            Self::Aggregating => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Per-task execution constraints validated at `TaskInput` construction time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskConstraints {
    pub max_agents: u8,
    pub timeout_ms: u64,
}

impl Default for TaskConstraints {
    fn default() -> Self {
        Self {
            max_agents: 3,
            timeout_ms: 600_000,
        }
    }
}

impl TaskConstraints {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=10).contains(&self.max_agents) {
            return Err(ValidationError::Invalid {
                field: "maxAgents".to_string(),
                reason: "must be in [1, 10]".to_string(),
            });
        }
        if self.timeout_ms < 1000 {
            return Err(ValidationError::Invalid {
                field: "timeoutMs".to_string(),
                reason: "must be >= 1000".to_string(),
            });
        }
        Ok(())
    }
}

/// The validated input to `Orchestrator::run`. Distinct from `Task` so that
/// validation happens once, at the API boundary, before a `Task` ever exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    pub description: String,
    pub project_path: String,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub max_agents: Option<u8>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TaskInput {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.description.trim().is_empty() {
            return Err(ValidationError::Invalid {
                field: "description".to_string(),
                reason: "must be non-empty".to_string(),
            });
        }
        if self.project_path.trim().is_empty() {
            return Err(ValidationError::Invalid {
                field: "projectPath".to_string(),
                reason: "must be non-empty".to_string(),
            });
        }
        if let Some(max_agents) = self.max_agents {
            if !(1..=10).contains(&max_agents) {
                return Err(ValidationError::Invalid {
                    field: "maxAgents".to_string(),
                    reason: "must be in [1, 10]".to_string(),
                });
            }
        }
        if let Some(timeout_ms) = self.timeout_ms {
            if timeout_ms < 1000 {
                return Err(ValidationError::Invalid {
                    field: "timeoutMs".to_string(),
                    reason: "must be >= 1000".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn constraints(&self) -> TaskConstraints {
        TaskConstraints {
            max_agents: self.max_agents.unwrap_or(3),
            timeout_ms: self.timeout_ms.unwrap_or(600_000),
        }
    }
}

/// The unit of user intent, owned exclusively by the Orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub project_path: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub constraints: TaskConstraints,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Task {
    pub fn from_input(input: &TaskInput, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: input.description.clone(),
            project_path: input.project_path.clone(),
            task_type: input.task_type.unwrap_or_default(),
            status: TaskStatus::Pending,
            constraints: input.constraints(),
            created_at: now,
            updated_at: now,
            error: None,
        }
    }
}
