//! Domain error types for the orchestration engine.
//!
//! Each enum covers errors from one component or concern; all carry a short
//! code via `Display` (from `thiserror`) and, where relevant, a `#[source]`
//! cause chain.

use thiserror::Error;
use uuid::Uuid;

/// Errors from the Shared Store (`Store` port).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("schema validation failed for {key}: {reason}")]
    SchemaInvalid { key: String, reason: String },

    #[error("backend I/O error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from task lifecycle operations.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error("task {0} has no subtasks after decomposition")]
    NoSubtasks(Uuid),

    #[error("task {0} has an unsatisfiable dependency graph")]
    UnsatisfiableGraph(Uuid),

    #[error("invalid status transition for task {id}: {from} -> {to}")]
    InvalidStatusTransition {
        id: Uuid,
        from: &'static str,
        to: &'static str,
    },
}

/// Errors from subtask schema/validation operations.
#[derive(Error, Debug)]
pub enum SubtaskError {
    #[error("subtask not found: {0}")]
    NotFound(Uuid),

    #[error("invalid status transition for subtask {id}: {from} -> {to}")]
    InvalidStatusTransition {
        id: Uuid,
        from: &'static str,
        to: &'static str,
    },

    #[error("subtask {0} exceeded maxAttempts without a retry override")]
    MaxAttemptsExceeded(Uuid),
}

/// Errors from worker/agent runtime operations.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent {0} did not become ready in time")]
    ReadyTimeout(String),

    #[error("agent {0} crashed: {1}")]
    Crashed(String, String),

    #[error("IPC error with agent {0}: {1}")]
    Ipc(String, String),

    #[error("no idle worker available")]
    NoIdleWorker,
}

/// Errors from bounded waits (`waitFor`, worker readiness, IPC round-trips).
#[derive(Error, Debug)]
pub enum TimeoutError {
    #[error("timed out after {0}ms waiting for {1}")]
    Elapsed(u64, String),
}

/// Errors from schema validation of `TaskInput` / `DecompositionResult`.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("decomposition has a cycle involving index {0}")]
    Cycle(usize),

    #[error("decomposition dependency index {index} out of range [0, {len})")]
    DependencyOutOfRange { index: i64, len: usize },

    #[error("decomposition entry at index {0} depends on itself")]
    SelfDependency(usize),

    #[error("decomposition is empty and no resume context was provided")]
    EmptyWithoutResume,

    #[error("unknown configuration key: {0}")]
    UnknownConfigKey(String),
}

/// Top-level error type returned by `Orchestrator` public methods.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Subtask(#[from] SubtaskError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("fatal error: {0}")]
    Fatal(String),
}
