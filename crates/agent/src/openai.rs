//! Streaming client for OpenAI-compatible chat completion endpoints
//! (OpenAI itself, Ollama's `/v1` surface, and most hosted gateways).

use std::collections::BTreeMap;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use parley_core::config::LlmConfig;
use parley_core::messages::MessageContent;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{ModelClient, ModelError, ModelEvent, ModelEventStream, PromptMessage, TokenUsage};

const DONE_SENTINEL: &str = "[DONE]";

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    idle_timeout: Duration,
}

impl OpenAiCompatClient {
    pub fn from_config(llm: &LlmConfig) -> Result<Self, ModelError> {
        let base_url = llm.effective_base_url().ok_or_else(|| {
            ModelError::Configuration(format!(
                "provider `{}` has no chat completion endpoint",
                llm.provider.as_str()
            ))
        })?;
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(llm.timeout_secs))
            .build()
            .map_err(|error| ModelError::Configuration(error.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{base_url}/chat/completions"),
            api_key: llm.api_key.clone(),
            model: llm.model.clone(),
            temperature: llm.temperature,
            idle_timeout: Duration::from_secs(llm.timeout_secs),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body<'a>(&'a self, prompt: &'a [PromptMessage]) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: prompt
                .iter()
                .map(|message| WireMessage { role: message.role.as_str(), content: &message.text })
                .collect(),
            stream: true,
            stream_options: WireStreamOptions { include_usage: true },
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn subscribe(
        &self,
        prompt: Vec<PromptMessage>,
    ) -> Result<ModelEventStream, ModelError> {
        let mut request = self.http.post(&self.endpoint).json(&self.request_body(&prompt));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| ModelError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status { status: status.as_u16(), body });
        }

        debug!(
            event_name = "model.subscription.opened",
            endpoint = %self.endpoint,
            model = %self.model,
            "opened model subscription"
        );

        let idle_timeout = self.idle_timeout;
        let mut sse = response.bytes_stream().eventsource();
        let events = stream! {
            let mut decoder = ChunkDecoder::default();
            loop {
                let event = match tokio::time::timeout(idle_timeout, sse.next()).await {
                    Ok(Some(Ok(event))) => event,
                    Ok(None) => break,
                    Ok(Some(Err(error))) => {
                        yield Err(ModelError::Transport(error.to_string()));
                        break;
                    }
                    Err(_) => {
                        yield Err(ModelError::IdleTimeout { secs: idle_timeout.as_secs() });
                        break;
                    }
                };

                if event.data.trim() == DONE_SENTINEL {
                    break;
                }

                match decoder.decode(&event.data) {
                    Ok(decoded) => {
                        for item in decoded {
                            yield Ok(item);
                        }
                    }
                    Err(error) => {
                        yield Err(error);
                        break;
                    }
                }
            }
        };

        Ok(events.boxed())
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    stream_options: WireStreamOptions,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    content: Option<Value>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<WireFunction>,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Turns raw `data:` payloads into model events. Tool calls arrive as
/// fragments keyed by index and are assembled until the choice finishes.
#[derive(Debug, Default)]
pub(crate) struct ChunkDecoder {
    pending_tools: BTreeMap<usize, PendingToolCall>,
}

impl ChunkDecoder {
    pub(crate) fn decode(&mut self, data: &str) -> Result<Vec<ModelEvent>, ModelError> {
        let value: Value = serde_json::from_str(data)
            .map_err(|error| ModelError::Decode(format!("{error}, data: {data}")))?;

        if let Some(message) = extract_api_error_message(&value) {
            warn!(event_name = "model.stream.api_error", error = %message, "model reported an error");
            return Err(ModelError::Upstream(message));
        }

        let chunk: ChatCompletionChunk = serde_json::from_value(value)
            .map_err(|error| ModelError::Decode(format!("{error}, data: {data}")))?;

        let mut events = Vec::new();
        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(content) = choice.delta.content {
                let content = MessageContent::from_value(&content);
                if !content.is_empty() {
                    events.push(ModelEvent::ContentChunk(content));
                }
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                self.absorb_tool_call(call, &mut events);
            }

            if choice.finish_reason.as_deref() == Some("tool_calls") {
                events.extend(self.drain_tool_calls());
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(ModelEvent::GenerationEnd {
                usage: Some(TokenUsage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                }),
            });
        }

        Ok(events)
    }

    fn absorb_tool_call(&mut self, call: WireToolCall, events: &mut Vec<ModelEvent>) {
        let pending = self.pending_tools.entry(call.index).or_default();
        let (name, arguments) = match call.function {
            Some(function) => (function.name, function.arguments),
            None => (None, None),
        };

        if let Some(id) = call.id.filter(|id| !id.is_empty()) {
            pending.id = id;
        }
        if let Some(name) = name.filter(|name| !name.is_empty()) {
            pending.name = name;
            events.push(ModelEvent::ToolCallStart {
                id: pending.id.clone(),
                name: pending.name.clone(),
            });
        }
        if let Some(arguments) = arguments.filter(|arguments| !arguments.is_empty()) {
            pending.arguments.push_str(&arguments);
            events.push(ModelEvent::ToolCallDelta { id: pending.id.clone(), delta: arguments });
        }
    }

    fn drain_tool_calls(&mut self) -> Vec<ModelEvent> {
        std::mem::take(&mut self.pending_tools)
            .into_values()
            .map(|call| {
                let input = serde_json::from_str(&call.arguments)
                    .unwrap_or_else(|_| Value::String(call.arguments.clone()));
                ModelEvent::ToolCallReady { id: call.id, name: call.name, input }
            })
            .collect()
    }
}

fn extract_api_error_message(value: &Value) -> Option<String> {
    let error = value.get("error")?;
    if error.is_null() {
        return None;
    }
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}

#[cfg(test)]
mod tests {
    use parley_core::config::{AppConfig, LlmProvider};
    use serde_json::json;

    use super::{extract_api_error_message, ChunkDecoder, OpenAiCompatClient};
    use crate::llm::{ModelError, ModelEvent, PromptMessage, TokenUsage};

    fn decode(decoder: &mut ChunkDecoder, value: serde_json::Value) -> Vec<ModelEvent> {
        match decoder.decode(&value.to_string()) {
            Ok(events) => events,
            Err(error) => panic!("decode failed: {error}"),
        }
    }

    #[test]
    fn content_delta_becomes_content_chunk() {
        let mut decoder = ChunkDecoder::default();
        let events = decode(
            &mut decoder,
            json!({
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hel"}}]
            }),
        );
        assert_eq!(events, vec![ModelEvent::text("Hel")]);
    }

    #[test]
    fn empty_content_and_role_only_deltas_are_skipped() {
        let mut decoder = ChunkDecoder::default();
        assert!(decode(&mut decoder, json!({"choices": [{"delta": {"role": "assistant"}}]}))
            .is_empty());
        assert!(decode(&mut decoder, json!({"choices": [{"delta": {"content": ""}}]})).is_empty());
        assert!(decode(&mut decoder, json!({"choices": []})).is_empty());
    }

    #[test]
    fn usage_chunk_becomes_generation_end() {
        let mut decoder = ChunkDecoder::default();
        let events = decode(
            &mut decoder,
            json!({"choices": [], "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}}),
        );
        assert_eq!(
            events,
            vec![ModelEvent::GenerationEnd {
                usage: Some(TokenUsage { input_tokens: 12, output_tokens: 7 })
            }]
        );
    }

    #[test]
    fn in_band_error_becomes_upstream_error() {
        let mut decoder = ChunkDecoder::default();
        let result = decoder.decode(&json!({"error": {"message": "quota exceeded"}}).to_string());
        assert_eq!(result, Err(ModelError::Upstream("quota exceeded".to_string())));
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let mut decoder = ChunkDecoder::default();
        assert!(matches!(decoder.decode("{not json"), Err(ModelError::Decode(_))));
    }

    #[test]
    fn tool_call_fragments_are_assembled() {
        let mut decoder = ChunkDecoder::default();
        let first = decode(
            &mut decoder,
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "lookup", "arguments": "{\"q\":"}}
            ]}}]}),
        );
        let second = decode(
            &mut decoder,
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"rust\"}"}}
            ]}, "finish_reason": "tool_calls"}]}),
        );

        assert_eq!(
            first,
            vec![
                ModelEvent::ToolCallStart { id: "call_1".to_string(), name: "lookup".to_string() },
                ModelEvent::ToolCallDelta { id: "call_1".to_string(), delta: "{\"q\":".to_string() },
            ]
        );
        assert_eq!(
            second,
            vec![
                ModelEvent::ToolCallDelta { id: "call_1".to_string(), delta: "\"rust\"}".to_string() },
                ModelEvent::ToolCallReady {
                    id: "call_1".to_string(),
                    name: "lookup".to_string(),
                    input: json!({"q": "rust"}),
                },
            ]
        );
    }

    #[test]
    fn extracts_api_error_message_shapes() {
        assert_eq!(
            extract_api_error_message(&json!({"error": "provider error"})).as_deref(),
            Some("provider error")
        );
        assert_eq!(
            extract_api_error_message(&json!({"error": {"code": 500}})).as_deref(),
            Some("An error occurred during streaming")
        );
        assert!(extract_api_error_message(&json!({"error": null})).is_none());
        assert!(extract_api_error_message(&json!({"choices": []})).is_none());
    }

    #[test]
    fn request_body_carries_streaming_options() {
        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::Ollama;
        config.llm.model = "llama3".to_string();

        let client = match OpenAiCompatClient::from_config(&config.llm) {
            Ok(client) => client,
            Err(error) => panic!("client build failed: {error}"),
        };
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");

        let prompt = vec![PromptMessage::user("hi")];
        let body = match serde_json::to_value(client.request_body(&prompt)) {
            Ok(body) => body,
            Err(error) => panic!("serialize failed: {error}"),
        };
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["messages"], json!([{"role": "user", "content": "hi"}]));
    }

    #[test]
    fn mock_provider_has_no_endpoint() {
        let config = AppConfig::default();
        assert!(matches!(
            OpenAiCompatClient::from_config(&config.llm),
            Err(ModelError::Configuration(_))
        ));
    }
}
