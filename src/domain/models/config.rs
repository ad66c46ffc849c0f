//! Orchestrator configuration: a flat record with enumerated recognized
//! keys, matching design note §9 ("config objects with many options").
//! Unknown keys are rejected at validation, not silently ignored.

use serde::{Deserialize, Serialize};

use crate::domain::error::ValidationError;

/// Strategy the Scheduler/Orchestrator asks the Decomposer to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionStrategy {
    Parallel,
    Hierarchical,
    /// Chosen automatically from project-type detection (spec §4.3).
    Auto,
}

impl Default for DecompositionStrategy {
    fn default() -> Self {
        Self::Auto
    }
}

/// Flat orchestrator configuration record (spec §9, design note on "config
/// objects with many options"). `#[serde(deny_unknown_fields)]` enforces the
/// "unknown keys are rejected at validation" requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub store_url: String,
    pub api_key: String,
    pub model: String,
    pub max_workers: u8,
    pub default_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Per spec §9: the per-subtask cap actually enforced is
    /// `max_retries + 1`.
    pub max_retries: u8,
    pub log_level: String,
    pub decomposition_strategy: DecompositionStrategy,
    pub allow_install: bool,
    /// Hierarchical decomposer's expansion bound: a phase's subtree may
    /// nest at most this many levels deep (spec §4.3, "maxDepth").
    pub max_decomposition_depth: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_url: "memory://local".to_string(),
            api_key: String::new(),
            model: "claude-opus-4-6-20250616".to_string(),
            max_workers: 3,
            default_timeout_ms: 600_000,
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            max_retries: 2,
            log_level: "info".to_string(),
            decomposition_strategy: DecompositionStrategy::Auto,
            allow_install: false,
            max_decomposition_depth: 3,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=10).contains(&self.max_workers) {
            return Err(ValidationError::Invalid {
                field: "maxWorkers".to_string(),
                reason: "must be in [1, 10]".to_string(),
            });
        }
        if !(0..=5).contains(&self.max_retries) {
            return Err(ValidationError::Invalid {
                field: "maxRetries".to_string(),
                reason: "must be in [0, 5]".to_string(),
            });
        }
        if self.default_timeout_ms < 1000 {
            return Err(ValidationError::Invalid {
                field: "defaultTimeoutMs".to_string(),
                reason: "must be >= 1000".to_string(),
            });
        }
        if self.max_decomposition_depth < 1 {
            return Err(ValidationError::Invalid {
                field: "maxDecompositionDepth".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    /// The per-subtask attempt cap, per DESIGN.md Open Question 3.
    pub fn max_attempts_per_subtask(&self) -> u32 {
        self.max_retries as u32 + 1
    }

    /// Period at which the Health Monitor polls (2x heartbeat interval,
    /// spec §4.5).
    pub fn health_check_interval_ms(&self) -> u64 {
        self.heartbeat_interval_ms * 2
    }
}
