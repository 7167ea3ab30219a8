use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub mock: MockConfig,
    pub stream: StreamConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub allowed_origins: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct MockConfig {
    pub delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub tool_visibility: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Mock,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub mock_delay_ms: Option<u64>,
    pub tool_visibility: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["parley.toml", "config/parley.toml"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                graceful_shutdown_secs: 15,
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
            llm: LlmConfig {
                provider: LlmProvider::Mock,
                api_key: None,
                base_url: None,
                model: "parley-mock".to_string(),
                timeout_secs: 60,
                temperature: 0.7,
            },
            mock: MockConfig { delay_ms: 50 },
            stream: StreamConfig { tool_visibility: false },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected mock|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    /// Base URL the OpenAI-compatible client should target, including the
    /// provider default when none is configured.
    pub fn effective_base_url(&self) -> Option<String> {
        let configured =
            self.base_url.as_deref().map(str::trim).filter(|value| !value.is_empty());
        match (self.provider, configured) {
            (LlmProvider::Mock, _) => None,
            (_, Some(url)) => Some(url.trim_end_matches('/').to_string()),
            (LlmProvider::OpenAi, None) => Some("https://api.openai.com/v1".to_string()),
            (LlmProvider::Ollama, None) => Some("http://localhost:11434/v1".to_string()),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(allowed_origins) = server.allowed_origins {
                self.server.allowed_origins = allowed_origins;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
        }

        if let Some(mock) = patch.mock {
            if let Some(delay_ms) = mock.delay_ms {
                self.mock.delay_ms = delay_ms;
            }
        }

        if let Some(stream) = patch.stream {
            if let Some(tool_visibility) = stream.tool_visibility {
                self.stream.tool_visibility = tool_visibility;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PARLEY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("PARLEY_SERVER_PORT") {
            self.server.port = parse_u16("PARLEY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("PARLEY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_SERVER_ALLOWED_ORIGINS") {
            self.server.allowed_origins = split_list(&value);
        }

        if let Some(value) = read_env("PARLEY_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("PARLEY_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PARLEY_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("PARLEY_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("PARLEY_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("PARLEY_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PARLEY_LLM_TEMPERATURE") {
            self.llm.temperature = parse_f32("PARLEY_LLM_TEMPERATURE", &value)?;
        }

        if let Some(value) = read_env("PARLEY_MOCK_DELAY_MS") {
            self.mock.delay_ms = parse_u64("PARLEY_MOCK_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("PARLEY_STREAM_TOOL_VISIBILITY") {
            self.stream.tool_visibility = parse_bool("PARLEY_STREAM_TOOL_VISIBILITY", &value)?;
        }

        let log_level = read_env("PARLEY_LOGGING_LEVEL").or_else(|| read_env("PARLEY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PARLEY_LOGGING_FORMAT").or_else(|| read_env("PARLEY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(delay_ms) = overrides.mock_delay_ms {
            self.mock.delay_ms = delay_ms;
        }
        if let Some(tool_visibility) = overrides.tool_visibility {
            self.stream.tool_visibility = tool_visibility;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_llm(&self.llm)?;
        validate_mock(&self.mock)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    for origin in &server.allowed_origins {
        let origin = origin.trim();
        if origin != "*" && !origin.starts_with("http://") && !origin.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "server.allowed_origins entry `{origin}` must be `*` or start with http:// or https://"
            )));
        }
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama | LlmProvider::Mock => {}
    }

    if let Some(base_url) = &llm.base_url {
        let base_url = base_url.trim();
        if !base_url.is_empty()
            && !base_url.starts_with("http://")
            && !base_url.starts_with("https://")
        {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_mock(mock: &MockConfig) -> Result<(), ConfigError> {
    if mock.delay_ms > 10_000 {
        return Err(ConfigError::Validation("mock.delay_ms must be at most 10000".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    llm: Option<LlmPatch>,
    mock: Option<MockPatch>,
    stream: Option<StreamPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct MockPatch {
    delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamPatch {
    tool_visibility: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
