use parley_core::messages::{InboundMessage, Role};

use crate::llm::PromptMessage;

/// Builds the model prompt from the frontend history. Only user turns are
/// forwarded, one prompt entry per turn, in order.
pub fn to_prompt(history: &[InboundMessage]) -> Vec<PromptMessage> {
    history
        .iter()
        .filter(|message| message.role == Role::User)
        .map(|message| PromptMessage::user(message.text()))
        .collect()
}

/// Text of the most recent user turn, or an empty string.
pub fn latest_user_text(prompt: &[PromptMessage]) -> &str {
    prompt.last().map(|message| message.text.as_str()).unwrap_or_default()
}
