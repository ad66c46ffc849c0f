//! Remediation types — the Remediator's classification of a failed subtask.

use serde::{Deserialize, Serialize};

use super::decomposition::RawDecompositionEntry;

/// The classifier's decision for a failed subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    Retry,
    Decompose,
    Skip,
    Fail,
}

impl RemediationAction {
    /// Unknown actions collapse to `retry` (spec §4.6).
    pub fn parse_or_retry(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "retry" => Self::Retry,
            "decompose" => Self::Decompose,
            "skip" => Self::Skip,
            "fail" => Self::Fail,
            _ => Self::Retry,
        }
    }
}

/// Raw remediator response as parsed from the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRemediationDecision {
    pub action: String,
    pub reason: String,
    #[serde(default)]
    pub modified_description: Option<String>,
    #[serde(default)]
    pub new_subtasks: Vec<RawDecompositionEntry>,
}

/// A fully normalized remediation decision.
#[derive(Debug, Clone)]
pub struct RemediationDecision {
    pub action: RemediationAction,
    pub reason: String,
    pub modified_description: Option<String>,
    pub new_subtasks: Vec<super::decomposition::DecompositionResult>,
}

impl RemediationDecision {
    /// The default applied on any parsing or LLM-call error (spec §4.6).
    pub fn analysis_failed() -> Self {
        Self {
            action: RemediationAction::Retry,
            reason: "analysis failed".to_string(),
            modified_description: None,
            new_subtasks: Vec::new(),
        }
    }
}
