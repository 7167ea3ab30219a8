//! Agent runtime: turns a chat history into a live UI message stream.
//!
//! The crate owns everything between the HTTP handler and the model:
//! - Prompt adaptation (`conversation`) - frontend history → model prompt
//! - Model contract (`llm`) - the `ModelClient` trait and its event vocabulary
//! - Model clients (`mock`, `openai`) - development responder and
//!   OpenAI-compatible streaming client
//! - Stream orchestration (`runtime`) - model events → protocol frames
//!
//! # Failure model
//!
//! The orchestrator never surfaces an error to its caller. Every upstream
//! failure is rendered into the frame sequence and the stream still ends
//! with the terminal marker.

pub mod conversation;
pub mod llm;
pub mod mock;
pub mod openai;
pub mod runtime;

pub use llm::{
    build_model_client, ModelClient, ModelError, ModelEvent, ModelEventStream, PromptMessage,
    PromptRole, TokenUsage,
};
pub use runtime::{FrameStream, StreamOptions, StreamOrchestrator};
