//! UI message stream wire protocol.
//!
//! Every frame is one SSE `data:` line carrying a compact JSON object, except
//! the terminal marker which is the literal `data: [DONE]`. Field names are
//! part of the frontend contract and must not change.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STREAM_CONTENT_TYPE: &str = "text/event-stream";
pub const STREAM_PROTOCOL_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const STREAM_PROTOCOL_VERSION: &str = "v1";
pub const STREAM_CACHE_CONTROL: &str = "no-cache";
pub const STREAM_CONNECTION: &str = "keep-alive";
pub const STREAM_ACCEL_BUFFERING_HEADER: &str = "x-accel-buffering";

const DATA_PREFIX: &str = "data: ";
const FRAME_SUFFIX: &str = "\n\n";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(rename = "promptTokens")]
    pub prompt_tokens: u64,
    #[serde(rename = "completionTokens")]
    pub completion_tokens: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Error => "error",
        }
    }
}

/// Logical frames of the UI message stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    /// The step id travels in `messageId`; the frontend schema has no
    /// dedicated step field.
    StartStep {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    FinishStep {
        #[serde(rename = "finishReason")]
        finish_reason: FinishReason,
        usage: Usage,
        #[serde(rename = "isContinued")]
        is_continued: bool,
    },
    Finish {
        #[serde(rename = "finishReason")]
        finish_reason: FinishReason,
        usage: Usage,
    },
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
    ToolInputStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
    },
    ToolInputDelta {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "inputTextDelta")]
        input_text_delta: String,
    },
    ToolInputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },
    ToolOutputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: Value,
    },
}

impl StreamEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::StartStep { .. } => "start-step",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::FinishStep { .. } => "finish-step",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolInputDelta { .. } => "tool-input-delta",
            Self::ToolInputAvailable { .. } => "tool-input-available",
            Self::ToolOutputAvailable { .. } => "tool-output-available",
        }
    }
}

/// One encoded SSE frame, ready to be written to the response body.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Frame(String);

impl Frame {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_done(&self) -> bool {
        self.payload_text() == Some(DONE_SENTINEL)
    }

    /// JSON payload of the frame, `None` for the terminal marker.
    pub fn payload(&self) -> Option<&str> {
        self.payload_text().filter(|payload| *payload != DONE_SENTINEL)
    }

    pub fn event(&self) -> Option<StreamEvent> {
        self.payload().and_then(|payload| serde_json::from_str(payload).ok())
    }

    fn payload_text(&self) -> Option<&str> {
        self.0.strip_prefix(DATA_PREFIX).and_then(|rest| rest.strip_suffix(FRAME_SUFFIX))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Frame> for String {
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

pub fn encode(event: &StreamEvent) -> Frame {
    let payload = serde_json::to_string(event).unwrap_or_else(|error| {
        format!(
            "{{\"type\":\"error\",\"errorText\":\"frame serialization failed: {}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });
    Frame(format!("{DATA_PREFIX}{payload}{FRAME_SUFFIX}"))
}

pub fn start(message_id: &str) -> Frame {
    encode(&StreamEvent::Start { message_id: message_id.to_string() })
}

pub fn start_step(step_id: &str) -> Frame {
    encode(&StreamEvent::StartStep { message_id: step_id.to_string() })
}

pub fn text_start(text_id: &str) -> Frame {
    encode(&StreamEvent::TextStart { id: text_id.to_string() })
}

pub fn text_delta(text_id: &str, delta: &str) -> Frame {
    encode(&StreamEvent::TextDelta { id: text_id.to_string(), delta: delta.to_string() })
}

pub fn text_end(text_id: &str) -> Frame {
    encode(&StreamEvent::TextEnd { id: text_id.to_string() })
}

pub fn finish_step(reason: FinishReason, usage: Option<Usage>) -> Frame {
    encode(&StreamEvent::FinishStep {
        finish_reason: reason,
        usage: usage.unwrap_or_default(),
        is_continued: false,
    })
}

pub fn finish(reason: FinishReason, usage: Option<Usage>) -> Frame {
    encode(&StreamEvent::Finish { finish_reason: reason, usage: usage.unwrap_or_default() })
}

/// In-band error notice. Does not terminate the stream on its own.
pub fn error_event(error_text: &str) -> Frame {
    encode(&StreamEvent::Error { error_text: error_text.to_string() })
}

pub fn done_marker() -> Frame {
    Frame(format!("{DATA_PREFIX}{DONE_SENTINEL}{FRAME_SUFFIX}"))
}

pub fn tool_input_start(tool_call_id: &str, tool_name: &str) -> Frame {
    encode(&StreamEvent::ToolInputStart {
        tool_call_id: tool_call_id.to_string(),
        tool_name: tool_name.to_string(),
    })
}

pub fn tool_input_delta(tool_call_id: &str, delta: &str) -> Frame {
    encode(&StreamEvent::ToolInputDelta {
        tool_call_id: tool_call_id.to_string(),
        input_text_delta: delta.to_string(),
    })
}

pub fn tool_input_available(tool_call_id: &str, tool_name: &str, input: Value) -> Frame {
    encode(&StreamEvent::ToolInputAvailable {
        tool_call_id: tool_call_id.to_string(),
        tool_name: tool_name.to_string(),
        input,
    })
}

pub fn tool_output_available(tool_call_id: &str, output: Value) -> Frame {
    encode(&StreamEvent::ToolOutputAvailable { tool_call_id: tool_call_id.to_string(), output })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn start_frames_use_message_id_field() {
        assert_eq!(start("msg-1").as_str(), "data: {\"type\":\"start\",\"messageId\":\"msg-1\"}\n\n");
        assert_eq!(
            start_step("step-1").as_str(),
            "data: {\"type\":\"start-step\",\"messageId\":\"step-1\"}\n\n"
        );
    }

    #[test]
    fn text_frames_share_the_block_id() {
        assert_eq!(text_start("t1").as_str(), "data: {\"type\":\"text-start\",\"id\":\"t1\"}\n\n");
        assert_eq!(
            text_delta("t1", "Hel").as_str(),
            "data: {\"type\":\"text-delta\",\"id\":\"t1\",\"delta\":\"Hel\"}\n\n"
        );
        assert_eq!(text_end("t1").as_str(), "data: {\"type\":\"text-end\",\"id\":\"t1\"}\n\n");
    }

    #[test]
    fn empty_delta_is_still_encodable() {
        assert_eq!(
            text_delta("t1", "").as_str(),
            "data: {\"type\":\"text-delta\",\"id\":\"t1\",\"delta\":\"\"}\n\n"
        );
    }

    #[test]
    fn finish_frames_default_usage_to_zero() {
        assert_eq!(
            finish_step(FinishReason::Stop, None).as_str(),
            "data: {\"type\":\"finish-step\",\"finishReason\":\"stop\",\
             \"usage\":{\"promptTokens\":0,\"completionTokens\":0},\"isContinued\":false}\n\n"
        );
        assert_eq!(
            finish(FinishReason::Error, Some(Usage { prompt_tokens: 3, completion_tokens: 2 }))
                .as_str(),
            "data: {\"type\":\"finish\",\"finishReason\":\"error\",\
             \"usage\":{\"promptTokens\":3,\"completionTokens\":2}}\n\n"
        );
    }

    #[test]
    fn error_and_done_frames() {
        assert_eq!(
            error_event("boom").as_str(),
            "data: {\"type\":\"error\",\"errorText\":\"boom\"}\n\n"
        );
        assert_eq!(done_marker().as_str(), "data: [DONE]\n\n");
        assert!(done_marker().is_done());
        assert_eq!(done_marker().payload(), None);
        assert!(!error_event("[DONE]").is_done());
    }

    #[test]
    fn tool_frames_use_call_scoped_fields() {
        assert_eq!(
            tool_input_start("call-1", "search").as_str(),
            "data: {\"type\":\"tool-input-start\",\"toolCallId\":\"call-1\",\"toolName\":\"search\"}\n\n"
        );
        assert_eq!(
            tool_input_delta("call-1", "{\"q\":").as_str(),
            "data: {\"type\":\"tool-input-delta\",\"toolCallId\":\"call-1\",\"inputTextDelta\":\"{\\\"q\\\":\"}\n\n"
        );
        assert_eq!(
            tool_input_available("call-1", "search", json!({"q": "rust"})).as_str(),
            "data: {\"type\":\"tool-input-available\",\"toolCallId\":\"call-1\",\"toolName\":\"search\",\"input\":{\"q\":\"rust\"}}\n\n"
        );
        assert_eq!(
            tool_output_available("call-1", json!(["a", "b"])).as_str(),
            "data: {\"type\":\"tool-output-available\",\"toolCallId\":\"call-1\",\"output\":[\"a\",\"b\"]}\n\n"
        );
    }

    #[test]
    fn payload_is_compact_and_keeps_unicode() {
        let frame = text_delta("t1", "Grüße\nLine 2\t\"quoted\"");
        let payload = frame.payload().unwrap_or_default();

        assert!(!payload.contains(": "));
        assert!(payload.contains("Grüße"));
        assert_eq!(
            frame.event(),
            Some(StreamEvent::TextDelta {
                id: "t1".to_string(),
                delta: "Grüße\nLine 2\t\"quoted\"".to_string(),
            })
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let usage = Some(Usage { prompt_tokens: 7, completion_tokens: 11 });
        assert_eq!(finish(FinishReason::Stop, usage), finish(FinishReason::Stop, usage));
        assert_eq!(text_delta("t", "x"), text_delta("t", "x"));
        assert_eq!(done_marker(), done_marker());
    }

    #[test]
    fn type_names_match_serialized_tags() {
        let events = [
            StreamEvent::Start { message_id: "m".to_string() },
            StreamEvent::StartStep { message_id: "s".to_string() },
            StreamEvent::TextEnd { id: "t".to_string() },
            StreamEvent::Finish { finish_reason: FinishReason::Stop, usage: Usage::default() },
            StreamEvent::Error { error_text: "e".to_string() },
        ];

        for event in events {
            let frame = encode(&event);
            let payload: Value =
                serde_json::from_str(frame.payload().unwrap_or_default()).unwrap_or_default();
            assert_eq!(payload["type"], event.type_name());
        }
    }
}
