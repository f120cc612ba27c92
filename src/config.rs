use crate::llm::LlmEndpoints;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 100;
const DEFAULT_LLM_CONFIG_TTL_SECS: u64 = 30 * 60;
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Configuration was installed more than once.
    #[error("Configuration already initialized")]
    AlreadyInitialized,
}

/// Runtime configuration for the ingestion server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Buffer depth of each event bus subscriber.
    pub event_channel_capacity: usize,
    /// Lifetime of cached per-user LLM configuration.
    pub llm_config_ttl: Duration,
    /// Maximum number of entries held by the in-process cache.
    pub cache_capacity: usize,
    /// Expected embedding dimensionality; chunks with other sizes are rejected when set.
    pub embedding_dimension: Option<usize>,
    /// Base URLs for the supported LLM providers.
    pub llm_endpoints: LlmEndpoints,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = LlmEndpoints::default();

        Ok(Self {
            server_port: parse_optional(&optional, "SERVER_PORT")?,
            event_channel_capacity: parse_optional(&optional, "EVENT_CHANNEL_CAPACITY")?
                .unwrap_or(DEFAULT_EVENT_CHANNEL_CAPACITY),
            llm_config_ttl: Duration::from_secs(
                parse_optional(&optional, "LLM_CONFIG_TTL_SECS")?
                    .unwrap_or(DEFAULT_LLM_CONFIG_TTL_SECS),
            ),
            cache_capacity: parse_optional(&optional, "CACHE_CAPACITY")?
                .unwrap_or(DEFAULT_CACHE_CAPACITY),
            embedding_dimension: parse_optional(&optional, "EMBEDDING_DIMENSION")?,
            llm_endpoints: LlmEndpoints {
                openai: optional("OPENAI_BASE_URL").unwrap_or(defaults.openai),
                gemini: optional("GEMINI_BASE_URL").unwrap_or(defaults.gemini),
                anthropic: optional("ANTHROPIC_BASE_URL").unwrap_or(defaults.anthropic),
                ollama: optional("OLLAMA_URL").unwrap_or(defaults.ollama),
            },
        })
    }
}

fn parse_optional<T, F>(optional: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        server_port = ?config.server_port,
        event_channel_capacity = config.event_channel_capacity,
        llm_config_ttl_secs = config.llm_config_ttl.as_secs(),
        cache_capacity = config.cache_capacity,
        embedding_dimension = ?config.embedding_dimension,
        "Loaded configuration"
    );
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    Ok(get_config())
}
