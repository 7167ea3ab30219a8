use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parley_agent::llm::{ModelClient, ModelError, ModelEvent};
use parley_agent::mock::{canned_reply, tokenize, MockModelClient, ScriptedModelClient};
use parley_agent::runtime::{StreamOptions, StreamOrchestrator};
use parley_core::messages::InboundMessage;

use crate::commands::CommandResult;

#[derive(Clone, Debug)]
pub struct ReplayOptions {
    pub prompt: String,
    pub fail_after: Option<usize>,
    pub delay_ms: u64,
}

/// Runs one request through the orchestrator against the mock model and
/// returns the raw wire output.
pub fn run(options: ReplayOptions) -> CommandResult {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "replay",
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let delay = Duration::from_millis(options.delay_ms);
    let client: Arc<dyn ModelClient> = match options.fail_after {
        Some(chunks) => Arc::new(failing_script(&options.prompt, chunks).with_delay(delay)),
        None => Arc::new(MockModelClient::new(delay)),
    };
    let orchestrator = StreamOrchestrator::new(client, StreamOptions::default());

    let frames = runtime.block_on(async {
        orchestrator
            .stream_response(vec![InboundMessage::user(options.prompt.clone())])
            .map(|frame| frame.into_string())
            .collect::<Vec<_>>()
            .await
    });

    CommandResult::raw(0, frames.concat().trim_end().to_string())
}

/// The mock reply for `prompt`, cut off with an upstream error after
/// `chunks` content chunks.
fn failing_script(prompt: &str, chunks: usize) -> ScriptedModelClient {
    let mut items: Vec<Result<ModelEvent, ModelError>> =
        tokenize(canned_reply(prompt)).into_iter().take(chunks).map(ModelEvent::text).map(Ok).collect();
    items.push(Err(ModelError::Upstream(format!("simulated model failure after {chunks} chunks"))));
    ScriptedModelClient::new(items)
}
