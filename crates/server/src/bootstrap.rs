use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use parley_agent::llm::{build_model_client, ModelClient, ModelError};
use parley_agent::runtime::{StreamOptions, StreamOrchestrator};
use parley_core::config::{AppConfig, ConfigError, LoadOptions};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use crate::{chat, health};

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
}

/// Shared handler state. Cloned per request; everything inside is cheap to
/// clone.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: StreamOrchestrator,
    pub info: Arc<health::ServiceInfo>,
}

impl AppState {
    pub fn new(client: Arc<dyn ModelClient>, config: &AppConfig) -> Self {
        let options = StreamOptions { tool_visibility: config.stream.tool_visibility };
        let info = health::ServiceInfo::from_config(config, client.name());
        Self { orchestrator: StreamOrchestrator::new(client, options), info: Arc::new(info) }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("model client setup failed: {0}")]
    ModelClient(#[source] ModelError),
    #[error("invalid CORS origin `{0}`")]
    InvalidOrigin(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let client =
        build_model_client(&config.llm, &config.mock).map_err(BootstrapError::ModelClient)?;
    info!(
        event_name = "system.bootstrap.model_client_ready",
        correlation_id = "bootstrap",
        model_client = client.name(),
        tool_visibility = config.stream.tool_visibility,
        "model client initialized"
    );

    let state = AppState::new(client, &config);
    Ok(Application { config, state })
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Result<Router, BootstrapError> {
    Ok(Router::new()
        .route("/health", get(health::health))
        .route("/info", get(health::info))
        .route("/api/chat", post(chat::chat))
        .route("/chat", post(chat::complete))
        .layer(cors_layer(allowed_origins)?)
        .with_state(state))
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, BootstrapError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if allowed_origins.iter().any(|origin| origin.trim() == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let origins = allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin.trim())
                .map_err(|_| BootstrapError::InvalidOrigin(origin.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use parley_core::config::{ConfigOverrides, LlmProvider, LoadOptions};
    use tower::ServiceExt;

    use crate::bootstrap::{bootstrap, router};

    #[tokio::test]
    async fn bootstrap_fails_fast_without_openai_api_key() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                llm_provider: Some(LlmProvider::OpenAi),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = match result {
            Ok(_) => panic!("bootstrap should fail without an api key"),
            Err(error) => error.to_string(),
        };
        assert!(message.contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_with_mock_provider_serves_health() {
        let app = match bootstrap(LoadOptions {
            overrides: ConfigOverrides { mock_delay_ms: Some(0), ..ConfigOverrides::default() },
            ..LoadOptions::default()
        })
        .await
        {
            Ok(app) => app,
            Err(error) => panic!("bootstrap should succeed with defaults: {error}"),
        };
        assert_eq!(app.state.orchestrator.client_name(), "mock");

        let routes = match router(app.state, &app.config.server.allowed_origins) {
            Ok(routes) => routes,
            Err(error) => panic!("router should build: {error}"),
        };
        let response = routes
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let app = match bootstrap(LoadOptions::default()).await {
            Ok(app) => app,
            Err(error) => panic!("bootstrap should succeed with defaults: {error}"),
        };
        let routes = match router(app.state, &["http://localhost:3000".to_string()]) {
            Ok(routes) => routes,
            Err(error) => panic!("router should build: {error}"),
        };

        let response = routes
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/chat")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).map(|v| v.as_bytes()),
            Some(&b"http://localhost:3000"[..])
        );
    }

    #[tokio::test]
    async fn invalid_origin_is_rejected() {
        let app = match bootstrap(LoadOptions::default()).await {
            Ok(app) => app,
            Err(error) => panic!("bootstrap should succeed with defaults: {error}"),
        };
        assert!(router(app.state, &["http://bad\norigin".to_string()]).is_err());
    }
}
