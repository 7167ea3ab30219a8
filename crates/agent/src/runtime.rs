use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use parley_core::messages::InboundMessage;
use parley_core::protocol::{self, FinishReason, Frame, Usage};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversation::to_prompt;
use crate::llm::{ModelClient, ModelError, ModelEvent, TokenUsage};

pub type FrameStream = BoxStream<'static, Frame>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// Forward tool call events as tool frames instead of dropping them.
    pub tool_visibility: bool,
}

/// Drives one model generation per request and renders it as UI message
/// stream frames.
#[derive(Clone)]
pub struct StreamOrchestrator {
    client: Arc<dyn ModelClient>,
    options: StreamOptions,
}

impl StreamOrchestrator {
    pub fn new(client: Arc<dyn ModelClient>, options: StreamOptions) -> Self {
        Self { client, options }
    }

    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    pub fn options(&self) -> StreamOptions {
        self.options
    }

    /// Produces the full frame sequence for one assistant reply. The stream
    /// never fails: upstream errors are rendered as frames and the sequence
    /// always ends with the terminal marker. Dropping the stream abandons the
    /// upstream generation.
    pub fn stream_response(&self, history: Vec<InboundMessage>) -> FrameStream {
        let client = Arc::clone(&self.client);
        let options = self.options;

        let frames = stream! {
            let mut session = StreamSession::new();
            let mut guard = SessionGuard::new(&session.message_id);
            let prompt = to_prompt(&history);

            info!(
                event_name = "stream.session.started",
                message_id = %session.message_id,
                model_client = client.name(),
                history_len = history.len(),
                prompt_len = prompt.len(),
                "stream session started"
            );

            for frame in session.open() {
                yield frame;
            }

            let outcome = match client.subscribe(prompt).await {
                Err(error) => Err(error),
                Ok(mut events) => {
                    let mut outcome = Ok(());
                    while let Some(item) = events.next().await {
                        match item {
                            Ok(event) => {
                                for frame in session.apply(event, options) {
                                    yield frame;
                                }
                                session.idle();
                            }
                            Err(error) => {
                                outcome = Err(error);
                                break;
                            }
                        }
                    }
                    outcome
                }
            };

            let closing = match outcome {
                Ok(()) => {
                    let closing = session.succeed();
                    info!(
                        event_name = "stream.session.finished",
                        message_id = %session.message_id,
                        finish_reason = session.finish_reason.as_str(),
                        prompt_tokens = session.usage.prompt_tokens,
                        completion_tokens = session.usage.completion_tokens,
                        "stream session finished"
                    );
                    closing
                }
                Err(error) => {
                    warn!(
                        event_name = "stream.session.failed",
                        message_id = %session.message_id,
                        error = %error,
                        error_kind = error_kind(&error),
                        phase = ?session.phase,
                        text_open = session.text_started,
                        "model stream failed; rendering error frames"
                    );
                    session.fail(&error.to_string())
                }
            };

            for frame in closing {
                if frame.is_done() {
                    guard.complete();
                }
                yield frame;
            }
        };

        frames.boxed()
    }
}

fn error_kind(error: &ModelError) -> &'static str {
    match error {
        ModelError::Upstream(_) => "upstream",
        ModelError::Transport(_) => "transport",
        ModelError::Status { .. } => "status",
        ModelError::Decode(_) => "decode",
        ModelError::IdleTimeout { .. } => "idle_timeout",
        ModelError::Configuration(_) => "configuration",
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Init,
    Started,
    StreamingText,
    StreamingGap,
    Finished,
}

/// Per-request stream state. Owned by exactly one generator.
#[derive(Debug)]
struct StreamSession {
    message_id: String,
    step_id: String,
    text_block_id: Option<String>,
    text_started: bool,
    usage: Usage,
    finish_reason: FinishReason,
    phase: Phase,
}

impl StreamSession {
    fn new() -> Self {
        Self {
            message_id: prefixed_id("msg"),
            step_id: prefixed_id("step"),
            text_block_id: None,
            text_started: false,
            usage: Usage::default(),
            finish_reason: FinishReason::Stop,
            phase: Phase::Init,
        }
    }

    fn open(&mut self) -> Vec<Frame> {
        debug_assert_eq!(self.phase, Phase::Init);
        self.phase = Phase::Started;
        vec![protocol::start(&self.message_id), protocol::start_step(&self.step_id)]
    }

    fn apply(&mut self, event: ModelEvent, options: StreamOptions) -> Vec<Frame> {
        match event {
            ModelEvent::ContentChunk(content) => self.push_text(&content.text()),
            ModelEvent::GenerationEnd { usage } => {
                if let Some(usage) = usage {
                    self.record_usage(usage);
                }
                Vec::new()
            }
            ModelEvent::ToolCallStart { id, name } if options.tool_visibility => {
                let mut frames: Vec<Frame> = self.close_text().into_iter().collect();
                frames.push(protocol::tool_input_start(&id, &name));
                frames
            }
            ModelEvent::ToolCallDelta { id, delta } if options.tool_visibility => {
                vec![protocol::tool_input_delta(&id, &delta)]
            }
            ModelEvent::ToolCallReady { id, name, input } if options.tool_visibility => {
                vec![protocol::tool_input_available(&id, &name, input)]
            }
            ModelEvent::ToolResult { id, output } if options.tool_visibility => {
                vec![protocol::tool_output_available(&id, output)]
            }
            _ => Vec::new(),
        }
    }

    fn push_text(&mut self, text: &str) -> Vec<Frame> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut frames = Vec::with_capacity(2);
        if !self.text_started {
            let id = prefixed_id("text");
            frames.push(protocol::text_start(&id));
            self.text_block_id = Some(id);
            self.text_started = true;
        }
        if let Some(id) = &self.text_block_id {
            frames.push(protocol::text_delta(id, text));
        }
        self.phase = Phase::StreamingText;
        frames
    }

    /// Waiting for the next model event after a chunk was written.
    fn idle(&mut self) {
        if self.phase == Phase::StreamingText {
            self.phase = Phase::StreamingGap;
        }
    }

    fn close_text(&mut self) -> Option<Frame> {
        if !self.text_started {
            return None;
        }
        self.text_started = false;
        self.phase = Phase::StreamingGap;
        self.text_block_id.take().map(|id| protocol::text_end(&id))
    }

    fn record_usage(&mut self, usage: TokenUsage) {
        self.usage =
            Usage { prompt_tokens: usage.input_tokens, completion_tokens: usage.output_tokens };
    }

    fn succeed(&mut self) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self.close_text().into_iter().collect();
        self.finish_reason = FinishReason::Stop;
        frames.extend(self.terminal_frames());
        frames
    }

    fn fail(&mut self, message: &str) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self.close_text().into_iter().collect();
        let notice_id = prefixed_id("text");
        frames.push(protocol::text_start(&notice_id));
        frames.push(protocol::text_delta(&notice_id, &format!("Error: {message}")));
        frames.push(protocol::text_end(&notice_id));
        frames.push(protocol::error_event(message));
        self.finish_reason = FinishReason::Error;
        frames.extend(self.terminal_frames());
        frames
    }

    fn terminal_frames(&mut self) -> [Frame; 3] {
        self.phase = Phase::Finished;
        [
            protocol::finish_step(self.finish_reason, Some(self.usage)),
            protocol::finish(self.finish_reason, Some(self.usage)),
            protocol::done_marker(),
        ]
    }
}

fn prefixed_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Notices when the consumer drops the stream before the terminal marker.
struct SessionGuard {
    message_id: String,
    completed: bool,
}

impl SessionGuard {
    fn new(message_id: &str) -> Self {
        Self { message_id: message_id.to_string(), completed: false }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.completed {
            debug!(
                event_name = "stream.session.cancelled",
                message_id = %self.message_id,
                "client disconnected before the stream finished"
            );
        }
    }
}
