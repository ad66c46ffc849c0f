//! Decomposition types: the Decomposer's output shape and the Resume
//! protocol's input shape.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::subtask::AgentType;

/// One entry in a decomposition plan. `dependencies` are indices into the
/// same list (not ids) until the scheduler materializes them into Subtasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionResult {
    pub description: String,
    pub agent_type: AgentType,
    pub dependencies: Vec<usize>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub complexity: Option<u8>,
}

/// Raw, unvalidated decomposition entry as it comes back from the LLM
/// (`agent_type` as free text, to be normalized by the validator).
#[derive(Debug, Clone, Deserialize)]
pub struct RawDecompositionEntry {
    pub description: String,
    pub agent_type: String,
    #[serde(default)]
    pub dependencies: Vec<i64>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub complexity: Option<u8>,
}

/// Prior durable state fed into a resume-mode decomposition call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeContext {
    pub completed_work: Vec<ResumeWorkItem>,
    pub failed_work: Vec<ResumeWorkItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeWorkItem {
    pub subtask_id: Uuid,
    pub description: String,
    pub agent_type: AgentType,
    pub error: Option<String>,
}
