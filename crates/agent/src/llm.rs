use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parley_core::config::{LlmConfig, LlmProvider, MockConfig};
use parley_core::messages::MessageContent;
use serde_json::Value;
use thiserror::Error;

use crate::mock::MockModelClient;
use crate::openai::OpenAiCompatClient;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptRole {
    User,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
        }
    }
}

/// One entry of the prompt handed to a model client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub text: String,
}

impl PromptMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: PromptRole::User, text: text.into() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Incremental notification from a running generation.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelEvent {
    ContentChunk(MessageContent),
    GenerationEnd { usage: Option<TokenUsage> },
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, delta: String },
    ToolCallReady { id: String, name: String, input: Value },
    ToolResult { id: String, output: Value },
    /// Any event kind this crate does not interpret.
    Other(String),
}

impl ModelEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::ContentChunk(MessageContent::Text(text.into()))
    }

    pub fn end(input_tokens: u64, output_tokens: u64) -> Self {
        Self::GenerationEnd { usage: Some(TokenUsage { input_tokens, output_tokens }) }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::ContentChunk(_) => "content_chunk",
            Self::GenerationEnd { .. } => "generation_end",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallDelta { .. } => "tool_call_delta",
            Self::ToolCallReady { .. } => "tool_call_ready",
            Self::ToolResult { .. } => "tool_result",
            Self::Other(kind) => kind,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Failure reported by the model itself; displayed verbatim.
    #[error("{0}")]
    Upstream(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("model endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode model event: {0}")]
    Decode(String),
    #[error("model stream idle for more than {secs}s")]
    IdleTimeout { secs: u64 },
    #[error("model client misconfigured: {0}")]
    Configuration(String),
}

pub type ModelEventStream = BoxStream<'static, Result<ModelEvent, ModelError>>;

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Short identifier used in logs and `/info`.
    fn name(&self) -> &str;

    /// Starts a generation and returns its event subscription. Dropping the
    /// returned stream abandons the generation.
    async fn subscribe(&self, prompt: Vec<PromptMessage>)
        -> Result<ModelEventStream, ModelError>;
}

pub fn build_model_client(
    llm: &LlmConfig,
    mock: &MockConfig,
) -> Result<Arc<dyn ModelClient>, ModelError> {
    match llm.provider {
        LlmProvider::Mock => {
            Ok(Arc::new(MockModelClient::new(Duration::from_millis(mock.delay_ms))))
        }
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            Ok(Arc::new(OpenAiCompatClient::from_config(llm)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use parley_core::config::AppConfig;
    use parley_core::config::LlmProvider;

    use super::{build_model_client, ModelError, ModelEvent};

    #[test]
    fn upstream_error_displays_bare_message() {
        assert_eq!(ModelError::Upstream("rate limited".to_string()).to_string(), "rate limited");
    }

    #[test]
    fn event_kinds_are_stable() {
        assert_eq!(ModelEvent::text("a").kind(), "content_chunk");
        assert_eq!(ModelEvent::end(1, 2).kind(), "generation_end");
        assert_eq!(ModelEvent::Other("heartbeat".to_string()).kind(), "heartbeat");
    }

    #[test]
    fn builds_client_for_each_provider() {
        let mut config = AppConfig::default();
        let mock = build_model_client(&config.llm, &config.mock);
        assert!(matches!(mock, Ok(ref client) if client.name() == "mock"));

        config.llm.provider = LlmProvider::Ollama;
        config.llm.model = "llama3".to_string();
        let ollama = build_model_client(&config.llm, &config.mock);
        assert!(matches!(ollama, Ok(ref client) if client.name() == "openai-compatible"));
    }
}
