pub mod config;
pub mod errors;
pub mod messages;
pub mod protocol;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
pub use errors::{ApplicationError, InterfaceError};
pub use messages::{ChatRequest, InboundMessage, MessageContent, Part, Role};
pub use protocol::{FinishReason, Frame, StreamEvent, Usage};
