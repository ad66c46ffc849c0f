//! Real `LlmClient` implementation against Anthropic's Messages API.
//! Grounded on the teacher's `ClaudeClientImpl` (`infrastructure/claude_client.rs`):
//! a thin `reqwest` wrapper with bounded retry via `backoff`.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};

use crate::domain::ports::llm_client::{LlmClient, LlmRequest};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Conservative client-side cap, independent of whatever limit the account
/// actually has, so a runaway decomposition loop can't hammer the API.
const REQUESTS_PER_SECOND: u32 = 5;

type ClientRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// `reqwest`-backed client for Anthropic's Messages API, with exponential
/// backoff on transient failures (connect errors, 429, 5xx).
pub struct AnthropicLlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    limiter: ClientRateLimiter,
}

impl AnthropicLlmClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(REQUESTS_PER_SECOND).expect("REQUESTS_PER_SECOND is nonzero"),
        );
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client builder should not fail with default TLS config"),
            api_key: api_key.into(),
            model: model.into(),
            limiter: RateLimiter::direct(quota),
        }
    }

    async fn send_once(&self, request: &LlmRequest) -> anyhow::Result<String> {
        self.limiter.until_ready().await;

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: vec![Message {
                role: "user",
                content: &request.user,
            }],
        };

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            anyhow::bail!("transient anthropic api error: {status}");
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("anthropic api error {status}: {text}");
        }

        let parsed: MessagesResponse = response.json().await?;
        Ok(parsed
            .content
            .into_iter()
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl LlmClient for AnthropicLlmClient {
    async fn complete(&self, request: LlmRequest) -> anyhow::Result<String> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(Some(Duration::from_secs(60)))
            .build();

        retry(backoff, || async {
            self.send_once(&request)
                .await
                .map_err(backoff::Error::transient)
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))
    }
}
