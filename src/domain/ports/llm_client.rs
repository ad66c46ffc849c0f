//! `LlmClient` port — the chat API used by the Decomposer and Remediator.
//! The real API is an out-of-scope, contract-only collaborator (spec §1);
//! this trait is the contract, grounded on the teacher's `ClaudeClient`
//! port (`domain/ports/claude_client.rs`).

use async_trait::async_trait;

/// A single turn sent to the LLM: a system prompt and a user message.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 4096,
        }
    }
}

/// Port interface for the chat API used by the Decomposer and Remediator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends a single-turn request and returns the model's raw text
    /// response.
    async fn complete(&self, request: LlmRequest) -> anyhow::Result<String>;
}
