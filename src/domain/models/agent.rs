//! AgentEntry domain model — the registration record of a worker.
//!
//! `currentSubtaskId` is a plain id field, never a pointer: it is a weak
//! back-reference used only by the Health Monitor for recovery (design note
//! §9), looked up through the Store rather than held as a graph edge.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::subtask::AgentType;

/// Liveness classification assigned by the Health Monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }
}

/// The Health Monitor's liveness grading for an agent, derived from how many
/// heartbeat intervals have been missed (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthGrade {
    Healthy,
    Warning,
    Critical,
    Dead,
}

impl HealthGrade {
    pub fn from_missed_intervals(missed: u64) -> Self {
        match missed {
            0 => Self::Healthy,
            1 => Self::Warning,
            2 => Self::Critical,
            _ => Self::Dead,
        }
    }
}

/// Cumulative execution metrics for an agent, updated as results arrive.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub avg_execution_ms: f64,
}

impl AgentMetrics {
    /// Folds a new completed execution duration into the running average.
    pub fn record_success(&mut self, execution_ms: u64) {
        self.roll_avg(execution_ms);
        self.tasks_completed += 1;
    }

    pub fn record_failure(&mut self, execution_ms: u64) {
        self.roll_avg(execution_ms);
        self.tasks_failed += 1;
    }

    fn roll_avg(&mut self, execution_ms: u64) {
        let total_prior = self.tasks_completed + self.tasks_failed;
        let total = total_prior + 1;
        self.avg_execution_ms =
            (self.avg_execution_ms * total_prior as f64 + execution_ms as f64) / total as f64;
    }
}

/// The registration record of a worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    pub agent_type: AgentType,
    pub pid: Option<u32>,
    pub status: AgentStatus,
    pub current_subtask_id: Option<Uuid>,
    pub last_heartbeat: i64,
    pub metrics: AgentMetrics,
}

impl AgentEntry {
    pub fn new(id: String, agent_type: AgentType, pid: Option<u32>, now_ms: i64) -> Self {
        Self {
            id,
            agent_type,
            pid,
            status: AgentStatus::Idle,
            current_subtask_id: None,
            last_heartbeat: now_ms,
            metrics: AgentMetrics::default(),
        }
    }
}
