//! Ports: trait contracts for the system's out-of-scope external
//! collaborators (spec §1) — the LLM chat API and the shared key-value
//! store.

pub mod llm_client;
pub mod store;

pub use llm_client::{LlmClient, LlmRequest};
pub use store::Store;
