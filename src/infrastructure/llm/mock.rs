//! `MockLlmClient` — scripted responses for tests, grounded on the
//! teacher's `adapters/substrates/mock.rs`.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::ports::llm_client::{LlmClient, LlmRequest};

/// Replays a fixed queue of responses, one per `complete()` call, cycling
/// back to the last entry once exhausted. Records every request it saw so
/// tests can assert on prompts.
pub struct MockLlmClient {
    responses: Mutex<Vec<String>>,
    cursor: Mutex<usize>,
    seen: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses),
            cursor: Mutex::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn single(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    pub fn requests_seen(&self) -> Vec<LlmRequest> {
        self.seen.lock().expect("seen mutex poisoned").clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: LlmRequest) -> anyhow::Result<String> {
        self.seen.lock().expect("seen mutex poisoned").push(request.clone());
        let responses = self.responses.lock().expect("responses mutex poisoned");
        if responses.is_empty() {
            anyhow::bail!("MockLlmClient has no scripted responses");
        }
        let mut cursor = self.cursor.lock().expect("cursor mutex poisoned");
        let index = (*cursor).min(responses.len() - 1);
        *cursor += 1;
        Ok(responses[index].clone())
    }
}
