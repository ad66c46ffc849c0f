//! Domain models for the orchestration engine.

pub mod agent;
pub mod config;
pub mod context;
pub mod decomposition;
pub mod event;
pub mod remediation;
pub mod result;
pub mod subtask;
pub mod task;

pub use agent::{AgentEntry, AgentMetrics, AgentStatus, HealthGrade};
pub use config::{DecompositionStrategy, OrchestratorConfig};
pub use context::{ContextEntry, ContextEntryType, SharedContext};
pub use event::{Event, EventType};
pub use decomposition::{DecompositionResult, RawDecompositionEntry, ResumeContext, ResumeWorkItem};
pub use remediation::{RawRemediationDecision, RemediationAction, RemediationDecision};
pub use result::SubtaskResult;
pub use subtask::{AgentType, Subtask, SubtaskStatus};
pub use task::{Task, TaskConstraints, TaskInput, TaskStatus, TaskType};
