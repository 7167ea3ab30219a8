use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use parley_core::config::AppConfig;
use parley_core::protocol::{STREAM_PROTOCOL_HEADER, STREAM_PROTOCOL_VERSION};
use serde::Serialize;

use crate::bootstrap::AppState;

pub const SERVICE_NAME: &str = "parley-server";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub checked_at: String,
}

/// Static description of the running service, resolved once at bootstrap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub provider: &'static str,
    pub model: String,
    pub model_client: String,
    pub protocol: String,
    pub capabilities: Vec<&'static str>,
}

impl ServiceInfo {
    pub fn from_config(config: &AppConfig, model_client: &str) -> Self {
        let mut capabilities = vec!["streaming", "chat", "usage-reporting"];
        if config.stream.tool_visibility {
            capabilities.push("tool-events");
        }

        Self {
            name: SERVICE_NAME,
            version: env!("CARGO_PKG_VERSION"),
            description: "Streams chat replies as AI SDK UI message stream events",
            provider: config.llm.provider.as_str(),
            model: config.llm.model.clone(),
            model_client: model_client.to_string(),
            protocol: format!("{STREAM_PROTOCOL_HEADER}/{STREAM_PROTOCOL_VERSION}"),
            capabilities,
        }
    }
}

pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    let payload = HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        checked_at: Utc::now().to_rfc3339(),
    };
    (StatusCode::OK, Json(payload))
}

pub async fn info(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(state.info.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use parley_agent::mock::ScriptedModelClient;
    use parley_core::config::AppConfig;

    use crate::bootstrap::AppState;
    use crate::health::{health, info};

    #[tokio::test]
    async fn health_reports_healthy() {
        let (status, Json(payload)) = health().await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "healthy");
        assert_eq!(payload.service, "parley-server");
        assert!(!payload.checked_at.is_empty());
    }

    #[tokio::test]
    async fn info_describes_model_and_capabilities() {
        let mut config = AppConfig::default();
        config.stream.tool_visibility = true;
        let state = AppState::new(Arc::new(ScriptedModelClient::from_events(Vec::new())), &config);

        let Json(payload) = info(State(state)).await;

        assert_eq!(payload.provider, "mock");
        assert_eq!(payload.model, "parley-mock");
        assert_eq!(payload.model_client, "scripted");
        assert_eq!(payload.protocol, "x-vercel-ai-ui-message-stream/v1");
        assert!(payload.capabilities.contains(&"streaming"));
        assert!(payload.capabilities.contains(&"tool-events"));
    }
}
