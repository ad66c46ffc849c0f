//! Remediator: classifies a failed subtask into retry/decompose/skip/fail
//! via the `LlmClient` port (spec §4.6), grounded on the teacher's
//! `services/llm_planner.rs` response-parsing idiom.

use std::sync::Arc;

use crate::domain::models::{RawRemediationDecision, RemediationDecision, Subtask};
use crate::domain::ports::{LlmClient, LlmRequest};
use crate::services::decomposer;

const SYSTEM_PROMPT: &str = "You are a failure remediator. Given a failed subtask and its error, decide \
one action: retry (try again unchanged), decompose (break it into smaller subtasks), skip (abandon it \
without failing the task), or fail (abandon the whole task). Respond with a JSON object with fields: \
action, reason, modified_description (optional), new_subtasks (array, only for decompose, each with \
description, agent_type, dependencies as indices into new_subtasks, priority, complexity).";

pub struct Remediator {
    llm: Arc<dyn LlmClient>,
}

impl Remediator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Classifies a failed subtask's next action. On any LLM or parse
    /// error, returns `RemediationDecision::analysis_failed()` (defaults to
    /// retry) rather than propagating — a remediation failure must never
    /// block the scheduler (spec §4.6).
    pub async fn remediate(&self, subtask: &Subtask) -> RemediationDecision {
        match self.try_remediate(subtask).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(subtask_id = %subtask.id, error = %e, "remediation analysis failed, defaulting to retry");
                RemediationDecision::analysis_failed()
            }
        }
    }

    async fn try_remediate(&self, subtask: &Subtask) -> anyhow::Result<RemediationDecision> {
        let user = format!(
            "Subtask: {}\nAgent type: {}\nAttempt {} of {}\nError: {}",
            subtask.description,
            subtask.agent_type.as_str(),
            subtask.attempts,
            subtask.max_attempts,
            subtask.error.as_deref().unwrap_or("unknown error"),
        );
        let request = LlmRequest::new(SYSTEM_PROMPT, user);
        let response = self.llm.complete(request).await?;
        let raw: RawRemediationDecision = parse_json_object(&response)?;

        let action = crate::domain::models::RemediationAction::parse_or_retry(&raw.action);
        let new_subtasks = if raw.new_subtasks.is_empty() {
            Vec::new()
        } else {
            decomposer::validate_and_normalize(raw.new_subtasks, None)?
        };

        Ok(RemediationDecision {
            action,
            reason: raw.reason,
            modified_description: raw.modified_description,
            new_subtasks,
        })
    }
}

fn parse_json_object(text: &str) -> anyhow::Result<RawRemediationDecision> {
    let start = text
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("no JSON object found in remediator response"))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| anyhow::anyhow!("no closing brace found in remediator response"))?;
    if end < start {
        anyhow::bail!("malformed JSON object in remediator response");
    }
    Ok(serde_json::from_str(&text[start..=end])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentType;
    use crate::infrastructure::llm::MockLlmClient;
    use uuid::Uuid;

    fn failed_subtask() -> Subtask {
        let mut subtask = Subtask::new(
            Uuid::new_v4(),
            "write the parser".to_string(),
            AgentType::Implementer,
            vec![],
            3,
            chrono::Utc::now(),
        );
        subtask.attempts = 1;
        subtask.error = Some("panicked: index out of bounds".to_string());
        subtask
    }

    #[tokio::test]
    async fn parses_a_retry_decision() {
        let llm = Arc::new(MockLlmClient::single(
            r#"{"action": "retry", "reason": "transient failure"}"#,
        ));
        let remediator = Remediator::new(llm);
        let decision = remediator.remediate(&failed_subtask()).await;
        assert_eq!(
            decision.action,
            crate::domain::models::RemediationAction::Retry
        );
    }

    #[tokio::test]
    async fn parses_a_decompose_decision_with_new_subtasks() {
        let llm = Arc::new(MockLlmClient::single(
            r#"{
                "action": "decompose",
                "reason": "too complex for one subtask",
                "new_subtasks": [
                    {"description": "split part one", "agent_type": "implementer", "dependencies": []},
                    {"description": "split part two", "agent_type": "tester", "dependencies": [0]}
                ]
            }"#,
        ));
        let remediator = Remediator::new(llm);
        let decision = remediator.remediate(&failed_subtask()).await;
        assert_eq!(
            decision.action,
            crate::domain::models::RemediationAction::Decompose
        );
        assert_eq!(decision.new_subtasks.len(), 2);
    }

    #[tokio::test]
    async fn malformed_response_defaults_to_retry() {
        let llm = Arc::new(MockLlmClient::single("not json at all"));
        let remediator = Remediator::new(llm);
        let decision = remediator.remediate(&failed_subtask()).await;
        assert_eq!(
            decision.action,
            crate::domain::models::RemediationAction::Retry
        );
        assert_eq!(decision.reason, "analysis failed");
    }
}
