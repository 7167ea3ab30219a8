use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use parley_core::errors::{ApplicationError, InterfaceError};
use parley_agent::runtime::FrameStream;
use parley_core::messages::{ChatRequest, InboundMessage};
use parley_core::protocol::{
    StreamEvent, STREAM_ACCEL_BUFFERING_HEADER, STREAM_CACHE_CONTROL, STREAM_CONNECTION,
    STREAM_CONTENT_TYPE, STREAM_PROTOCOL_HEADER, STREAM_PROTOCOL_VERSION,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bootstrap::AppState;

/// `POST /api/chat`: parses the history and streams the reply as UI message
/// stream frames. Only malformed request bodies produce a non-200 status;
/// model failures are reported inside the stream.
pub async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let correlation_id = format!("req-{}", Uuid::new_v4().simple());

    let request = match serde_json::from_slice::<ChatRequest>(&body) {
        Ok(request) => request,
        Err(error) => return reject(&correlation_id, error),
    };

    info!(
        event_name = "http.chat.accepted",
        correlation_id = %correlation_id,
        message_count = request.messages.len(),
        "streaming chat reply"
    );

    let frames = state
        .orchestrator
        .stream_response(request.messages)
        .map(|frame| Ok::<_, Infallible>(Bytes::from(frame.into_string())));
    ui_message_stream_response(frames)
}

/// `POST /chat` request body: a single user message without history.
#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub response: String,
}

/// `POST /chat`: runs the same orchestrator as `/api/chat` but waits for the
/// whole reply and returns it as one JSON object.
pub async fn complete(State(state): State<AppState>, body: Bytes) -> Response {
    let correlation_id = format!("req-{}", Uuid::new_v4().simple());

    let request = match serde_json::from_slice::<CompletionRequest>(&body) {
        Ok(request) => request,
        Err(error) => return reject(&correlation_id, error),
    };

    let frames = state.orchestrator.stream_response(vec![InboundMessage::user(request.message)]);
    match collect_reply(frames).await {
        Ok(response) => {
            info!(
                event_name = "http.completion.finished",
                correlation_id = %correlation_id,
                response_len = response.len(),
                "chat completion finished"
            );
            Json(CompletionResponse { response }).into_response()
        }
        Err(error) => {
            let interface = error.into_interface(correlation_id.as_str());
            warn!(
                event_name = "http.completion.failed",
                correlation_id = %correlation_id,
                error = %interface,
                "chat completion failed"
            );
            ApiError(interface).into_response()
        }
    }
}

/// Concatenates the text deltas of a finished frame sequence. An in-band
/// error frame fails the whole reply, so the `Error: ...` notice block is
/// never returned as content.
pub async fn collect_reply(mut frames: FrameStream) -> Result<String, ApplicationError> {
    let mut reply = String::new();
    let mut failure = None;
    while let Some(frame) = frames.next().await {
        match frame.event() {
            Some(StreamEvent::TextDelta { delta, .. }) => reply.push_str(&delta),
            Some(StreamEvent::Error { error_text }) => failure = Some(error_text),
            _ => {}
        }
    }

    match failure {
        Some(message) => Err(ApplicationError::Integration(message)),
        None if reply.is_empty() => Err(ApplicationError::EmptyResponse),
        None => Ok(reply),
    }
}

fn reject(correlation_id: &str, error: serde_json::Error) -> Response {
    let interface =
        ApplicationError::InvalidRequest(error.to_string()).into_interface(correlation_id);
    warn!(
        event_name = "http.chat.rejected",
        correlation_id = %correlation_id,
        error = %interface,
        "rejected malformed chat request"
    );
    ApiError(interface).into_response()
}

pub fn ui_message_stream_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(STREAM_CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(STREAM_CACHE_CONTROL));
    headers.insert(header::CONNECTION, HeaderValue::from_static(STREAM_CONNECTION));
    headers.insert(
        HeaderName::from_static(STREAM_ACCEL_BUFFERING_HEADER),
        HeaderValue::from_static("no"),
    );
    headers.insert(
        HeaderName::from_static(STREAM_PROTOCOL_HEADER),
        HeaderValue::from_static(STREAM_PROTOCOL_VERSION),
    );
    (headers, Body::from_stream(stream)).into_response()
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: &'a str,
    detail: &'static str,
    correlation_id: &'a str,
}

/// JSON error response for failures that happen before streaming starts.
pub struct ApiError(pub InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.code(),
            message: self.0.message(),
            detail: self.0.user_message(),
            correlation_id: self.0.correlation_id(),
        };
        (status, Json(body)).into_response()
    }
}
