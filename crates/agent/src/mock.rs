//! In-process model clients for development, demos and tests.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use parley_core::messages::MessageContent;

use crate::conversation::latest_user_text;
use crate::llm::{ModelClient, ModelError, ModelEvent, ModelEventStream, PromptMessage, TokenUsage};

const GREETING_REPLY: &str = "Hello! I'm the Parley development assistant. How can I help you today?";

const HELP_REPLY: &str = "I can assist you with various tasks:

1. Answer questions and provide information
2. Help with code and technical problems
3. Walk through documents you paste in
4. Keep a conversation going across turns

What would you like to explore?";

const SELF_TEST_REPLY: &str = "Test successful! The streaming is working correctly. ✓";

const DEFAULT_REPLY: &str = "I'm a mock model running in your development environment.

This response is being streamed token-by-token to simulate real model behavior. You can tune the delay between tokens with mock.delay_ms or PARLEY_MOCK_DELAY_MS.

Point llm.provider at openai or ollama to talk to a real model.";

const TOKEN_BOUNDARIES: [char; 8] = [' ', '\n', '.', ',', '!', '?', ':', ';'];

/// Picks the canned reply for the latest user message.
pub fn canned_reply(message: &str) -> &'static str {
    let lowered = message.to_lowercase();
    let words: Vec<&str> =
        lowered.split(|ch: char| !ch.is_alphanumeric()).filter(|word| !word.is_empty()).collect();
    let has = |candidates: &[&str]| words.iter().any(|word| candidates.contains(word));

    if has(&["hello", "hi", "hey"]) {
        GREETING_REPLY
    } else if has(&["help"]) {
        HELP_REPLY
    } else if has(&["test"]) {
        SELF_TEST_REPLY
    } else {
        DEFAULT_REPLY
    }
}

/// Splits text into stream tokens. A token ends after any boundary
/// character, so concatenating the tokens gives back the input.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        current.push(ch);
        if TOKEN_BOUNDARIES.contains(&ch) {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Keyword-driven responder that streams a canned reply token by token.
#[derive(Clone, Debug)]
pub struct MockModelClient {
    delay: Duration,
}

impl MockModelClient {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for MockModelClient {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn subscribe(
        &self,
        prompt: Vec<PromptMessage>,
    ) -> Result<ModelEventStream, ModelError> {
        let tokens = tokenize(canned_reply(latest_user_text(&prompt)));
        let input_tokens: u64 =
            prompt.iter().map(|message| message.text.split_whitespace().count() as u64).sum();
        let delay = self.delay;

        let events = stream! {
            let output_tokens = tokens.len() as u64;
            for token in tokens {
                yield Ok(ModelEvent::ContentChunk(MessageContent::Text(token)));
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            yield Ok(ModelEvent::GenerationEnd {
                usage: Some(TokenUsage { input_tokens, output_tokens }),
            });
        };

        Ok(events.boxed())
    }
}

#[derive(Clone, Debug)]
enum Script {
    Items(Vec<Result<ModelEvent, ModelError>>),
    FailOnSubscribe(ModelError),
}

/// Replays a fixed script of events. Every subscription gets its own copy.
#[derive(Clone, Debug)]
pub struct ScriptedModelClient {
    script: Script,
    delay: Duration,
}

impl ScriptedModelClient {
    pub fn new(items: Vec<Result<ModelEvent, ModelError>>) -> Self {
        Self { script: Script::Items(items), delay: Duration::ZERO }
    }

    pub fn from_events(events: Vec<ModelEvent>) -> Self {
        Self::new(events.into_iter().map(Ok).collect())
    }

    /// A client whose subscription cannot be opened.
    pub fn failing(error: ModelError) -> Self {
        Self { script: Script::FailOnSubscribe(error), delay: Duration::ZERO }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn subscribe(
        &self,
        _prompt: Vec<PromptMessage>,
    ) -> Result<ModelEventStream, ModelError> {
        let items = match &self.script {
            Script::Items(items) => items.clone(),
            Script::FailOnSubscribe(error) => return Err(error.clone()),
        };
        let delay = self.delay;

        let events = stream! {
            for item in items {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield item;
            }
        };

        Ok(events.boxed())
    }
}
