//! Chat history as submitted by the frontend.
//!
//! The wire shape is loose (role may be missing, content may be a string or a
//! list of typed parts), so every message is read field by field from a
//! `serde_json::Value` and normalized once into [`InboundMessage`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Assistant,
    System,
    Other,
}

impl Role {
    fn from_wire(value: &str) -> Self {
        match value {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Other { kind: String },
}

/// Either a flat string or an ordered list of typed parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<Part>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl MessageContent {
    /// Plain text of the content: text parts concatenated in order, every
    /// other part type skipped.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    Part::Text(text) => Some(text.as_str()),
                    Part::Other { .. } => None,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.iter().all(|part| match part {
                Part::Text(text) => text.is_empty(),
                Part::Other { .. } => true,
            }),
        }
    }

    /// Lenient conversion from an arbitrary JSON value. Strings become
    /// `Text`; arrays of `{type, text}` objects become `Parts`; anything else
    /// is empty text.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text.clone()),
            Value::Array(items) => Self::Parts(items.iter().map(part_from_value).collect()),
            _ => Self::default(),
        }
    }
}

fn part_from_value(value: &Value) -> Part {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    if kind == "text" {
        let text = value.get("text").and_then(Value::as_str).unwrap_or_default();
        Part::Text(text.to_string())
    } else {
        Part::Other { kind: kind.to_string() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl InboundMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    pub fn text(&self) -> String {
        self.content.text()
    }

    /// Reads each field on its own so a malformed field only loses itself.
    /// Non-empty `parts` win over `content`; a non-string `content` is empty.
    pub fn from_value(value: &Value) -> Self {
        let role =
            value.get("role").and_then(Value::as_str).map(Role::from_wire).unwrap_or_default();
        let parts = value.get("parts").and_then(Value::as_array).filter(|parts| !parts.is_empty());
        let content = match parts {
            Some(parts) => MessageContent::Parts(parts.iter().map(part_from_value).collect()),
            None => match value.get("content") {
                Some(Value::String(text)) => MessageContent::Text(text.clone()),
                _ => MessageContent::default(),
            },
        };
        Self { role, content }
    }
}

impl<'de> Deserialize<'de> for InboundMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

/// Body of a chat request. Fields other than `messages` are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ChatRequest, InboundMessage, MessageContent, Part, Role};

    fn parse(value: serde_json::Value) -> InboundMessage {
        serde_json::from_value(value).unwrap_or_default()
    }

    #[test]
    fn flat_content_is_used_when_parts_are_absent() {
        let message = parse(json!({"role": "user", "content": "Hello, world!"}));
        assert_eq!(message.role, Role::User);
        assert_eq!(message.text(), "Hello, world!");
    }

    #[test]
    fn text_parts_are_concatenated_in_order() {
        let message = parse(json!({
            "role": "user",
            "parts": [
                {"type": "text", "text": "Hello"},
                {"type": "file", "url": "http://example.com/file.pdf"},
                {"type": "text", "text": " world"}
            ]
        }));

        assert_eq!(message.text(), "Hello world");
        assert!(matches!(
            &message.content,
            MessageContent::Parts(parts) if parts[1] == Part::Other { kind: "file".to_string() }
        ));
    }

    #[test]
    fn non_empty_parts_win_over_content() {
        let message = parse(json!({
            "role": "user",
            "content": "ignored",
            "parts": [{"type": "text", "text": "kept"}]
        }));
        assert_eq!(message.text(), "kept");
    }

    #[test]
    fn empty_parts_fall_back_to_content() {
        let message = parse(json!({"role": "user", "content": "fallback", "parts": []}));
        assert_eq!(message.text(), "fallback");

        let message = parse(json!({"role": "user", "parts": []}));
        assert_eq!(message.text(), "");
    }

    #[test]
    fn missing_fields_default_to_user_and_empty_text() {
        let message = parse(json!({"content": "Hello"}));
        assert_eq!(message.role, Role::User);
        assert_eq!(message.text(), "Hello");

        let message = parse(json!({}));
        assert_eq!(message, InboundMessage::user(""));
    }

    #[test]
    fn text_part_without_text_contributes_nothing() {
        let message = parse(json!({
            "role": "user",
            "parts": [{"type": "text"}, {"type": "text", "text": "Hello"}]
        }));
        assert_eq!(message.text(), "Hello");
    }

    #[test]
    fn unknown_roles_and_odd_shapes_are_tolerated() {
        let message = parse(json!({"role": "tool", "content": 42, "extra": true}));
        assert_eq!(message.role, Role::Other);
        assert_eq!(message.text(), "");

        let message = parse(json!("not an object"));
        assert_eq!(message, InboundMessage::default());
    }

    #[test]
    fn malformed_parts_keep_role_and_content() {
        let message = parse(json!({"role": "assistant", "content": "answer", "parts": "oops"}));
        assert_eq!(message, InboundMessage::assistant("answer"));

        let message = parse(json!({
            "role": "user",
            "content": "keep me",
            "parts": {"type": "text", "text": "not a list"}
        }));
        assert_eq!(message.role, Role::User);
        assert_eq!(message.text(), "keep me");
    }

    #[test]
    fn malformed_role_keeps_parts() {
        let message = parse(json!({"role": 7, "parts": [{"type": "text", "text": "still here"}]}));
        assert_eq!(message.role, Role::User);
        assert_eq!(message.text(), "still here");
    }

    #[test]
    fn chat_request_ignores_unknown_fields() {
        let request: ChatRequest = serde_json::from_value(json!({
            "id": "chat-1",
            "trigger": "submit-message",
            "messages": [
                {"id": "m1", "role": "user", "parts": [{"type": "text", "text": "Hi"}]},
                {"role": "assistant", "content": "Hello!"}
            ]
        }))
        .unwrap_or_default();

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].text(), "Hi");
        assert_eq!(request.messages[1].role, Role::Assistant);
    }

    #[test]
    fn content_from_value_handles_strings_and_part_lists() {
        assert_eq!(MessageContent::from_value(&json!("abc")).text(), "abc");
        assert_eq!(
            MessageContent::from_value(&json!([
                {"type": "text", "text": "a"},
                {"type": "image_url"},
                {"type": "text", "text": "b"}
            ]))
            .text(),
            "ab"
        );
        assert!(MessageContent::from_value(&json!(null)).is_empty());
        assert!(MessageContent::from_value(&json!([{"type": "image_url"}])).is_empty());
    }
}
