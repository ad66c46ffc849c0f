//! Domain layer: core business models, errors, and ports (trait contracts
//! for the out-of-scope external collaborators named in spec §1).

pub mod error;
pub mod models;
pub mod ports;

pub use error::{
    AgentError, OrchestratorError, StoreError, SubtaskError, TaskError, TimeoutError,
    ValidationError,
};
