//! Subtask domain model.
//!
//! A Subtask is the atomic unit of work and of retry. Its status is written
//! by the Worker during `executing` and by the Orchestrator at terminal
//! transitions and retry resets (non-overlapping phases, per spec §5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::SubtaskResult;

/// The six agent roles. Differ only in system prompt (design note §9): a
/// tagged enum whose payload is a prompt template, never an inheritance
/// hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Researcher,
    Implementer,
    Reviewer,
    Tester,
    Documenter,
    Builder,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::Implementer => "implementer",
            Self::Reviewer => "reviewer",
            Self::Tester => "tester",
            Self::Documenter => "documenter",
            Self::Builder => "builder",
        }
    }

    /// Normalizes an unrecognized agent type string to `implementer`, per
    /// the decomposer validator and remediator contracts.
    pub fn parse_or_implementer(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "researcher" => Self::Researcher,
            "implementer" => Self::Implementer,
            "reviewer" => Self::Reviewer,
            "tester" => Self::Tester,
            "documenter" => Self::Documenter,
            "builder" => Self::Builder,
            _ => Self::Implementer,
        }
    }

    /// The role-specific fragment of the worker's system prompt.
    pub fn system_prompt_template(&self) -> &'static str {
        match self {
            Self::Researcher => {
                "You are a researcher. Investigate the codebase and report findings; do not modify files."
            }
            Self::Implementer => {
                "You are an implementer. Write the code needed to satisfy the subtask description."
            }
            Self::Reviewer => {
                "You are a reviewer. Evaluate the work of prior subtasks for correctness and quality."
            }
            Self::Tester => {
                "You are a tester. Write or run tests that exercise the behavior described."
            }
            Self::Documenter => {
                "You are a documenter. Write or update documentation describing the change."
            }
            Self::Builder => {
                "You are a builder. Set up or repair the project's build system and tooling."
            }
        }
    }
}

/// Status of a Subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Blocked,
    Queued,
    Assigned,
    Executing,
    Completed,
    Failed,
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The atomic unit of parallelism and retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub parent_task_id: Uuid,
    pub description: String,
    pub agent_type: AgentType,
    /// Ordered list of subtask ids this subtask depends on (may be empty).
    pub dependencies: Vec<Uuid>,
    pub status: SubtaskStatus,
    pub assigned_agent_id: Option<String>,
    pub result: Option<SubtaskResult>,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Set when the remediator's `decompose` action replaces this subtask;
    /// see DESIGN.md's Open Question 1 decision.
    pub decomposed_into: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl Subtask {
    pub fn new(
        parent_task_id: Uuid,
        description: String,
        agent_type: AgentType,
        dependencies: Vec<Uuid>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_task_id,
            description,
            agent_type,
            dependencies,
            status: SubtaskStatus::Pending,
            assigned_agent_id: None,
            result: None,
            attempts: 0,
            max_attempts,
            decomposed_into: Vec::new(),
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// I1: a subtask may transition to executing only if every dependency
    /// is in the `completed` set supplied by the caller.
    pub fn dependencies_satisfied(&self, completed: &std::collections::HashSet<Uuid>) -> bool {
        self.dependencies.iter().all(|d| completed.contains(d))
    }
}
