use std::env;
use std::fs;
use std::path::Path;

use parley_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            )
        }
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult::raw(0, lines.join("\n"))
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());

    vec![
        Field {
            key: "server.bind_address",
            env_keys: &["PARLEY_SERVER_BIND_ADDRESS"],
            value: config.server.bind_address.clone(),
        },
        Field {
            key: "server.port",
            env_keys: &["PARLEY_SERVER_PORT"],
            value: config.server.port.to_string(),
        },
        Field {
            key: "server.graceful_shutdown_secs",
            env_keys: &["PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            value: config.server.graceful_shutdown_secs.to_string(),
        },
        Field {
            key: "server.allowed_origins",
            env_keys: &["PARLEY_SERVER_ALLOWED_ORIGINS"],
            value: config.server.allowed_origins.join(","),
        },
        Field {
            key: "llm.provider",
            env_keys: &["PARLEY_LLM_PROVIDER"],
            value: config.llm.provider.as_str().to_string(),
        },
        Field {
            key: "llm.model",
            env_keys: &["PARLEY_LLM_MODEL"],
            value: config.llm.model.clone(),
        },
        Field {
            key: "llm.base_url",
            env_keys: &["PARLEY_LLM_BASE_URL"],
            value: config.llm.effective_base_url().unwrap_or_else(|| "<unset>".to_string()),
        },
        Field { key: "llm.api_key", env_keys: &["PARLEY_LLM_API_KEY"], value: api_key },
        Field {
            key: "llm.timeout_secs",
            env_keys: &["PARLEY_LLM_TIMEOUT_SECS"],
            value: config.llm.timeout_secs.to_string(),
        },
        Field {
            key: "llm.temperature",
            env_keys: &["PARLEY_LLM_TEMPERATURE"],
            value: config.llm.temperature.to_string(),
        },
        Field {
            key: "mock.delay_ms",
            env_keys: &["PARLEY_MOCK_DELAY_MS"],
            value: config.mock.delay_ms.to_string(),
        },
        Field {
            key: "stream.tool_visibility",
            env_keys: &["PARLEY_STREAM_TOOL_VISIBILITY"],
            value: config.stream.tool_visibility.to_string(),
        },
        Field {
            key: "logging.level",
            env_keys: &["PARLEY_LOGGING_LEVEL", "PARLEY_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key: "logging.format",
            env_keys: &["PARLEY_LOGGING_FORMAT", "PARLEY_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format).to_ascii_lowercase(),
        },
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
