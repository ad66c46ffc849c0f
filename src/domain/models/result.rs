//! SubtaskResult — written once by the worker (or synthesized by the
//! orchestrator for crashes/skips). I3: every terminal subtask has exactly
//! one stored result.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub subtask_id: Uuid,
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub execution_ms: u64,
}

impl SubtaskResult {
    pub fn success(subtask_id: Uuid, output: impl Into<String>, execution_ms: u64) -> Self {
        Self {
            subtask_id,
            success: true,
            output: Some(output.into()),
            error: None,
            execution_ms,
        }
    }

    pub fn failure(subtask_id: Uuid, error: impl Into<String>, execution_ms: u64) -> Self {
        Self {
            subtask_id,
            success: false,
            output: None,
            error: Some(error.into()),
            execution_ms,
        }
    }

    /// A result synthesized by the scheduler for a `skip` remediation
    /// decision. Counts as successful for aggregation purposes (DESIGN.md
    /// Open Question 2).
    pub fn skipped(subtask_id: Uuid) -> Self {
        Self::success(subtask_id, "skipped", 0)
    }

    /// A result synthesized for a `decompose` remediation decision: the
    /// original subtask is satisfied by its replacements.
    pub fn decomposed(subtask_id: Uuid) -> Self {
        Self::success(subtask_id, "decomposed", 0)
    }
}
