mod anthropic;
mod mock;

pub use anthropic::AnthropicLlmClient;
pub use mock::MockLlmClient;
