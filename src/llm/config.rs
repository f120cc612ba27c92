use crate::cache::{Cache, CacheError, TypedCache};
use crate::tasks::spawn_detached;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const FINGERPRINT_HEX_CHARS: usize = 8;

/// Provider, model and key a user's completions go through.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider credential.
    pub api_key: String,
    /// Provider-specific model identifier.
    pub model: String,
    /// Provider name.
    pub provider: String,
    /// Owning user; filled in when stored.
    #[serde(default)]
    pub user_id: String,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &api_key_fingerprint(&self.api_key))
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Request-supplied values that take precedence over the stored configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmConfigOverrides {
    /// Replacement credential.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Replacement model.
    #[serde(default)]
    pub model: Option<String>,
    /// Replacement provider.
    #[serde(default)]
    pub provider: Option<String>,
}

impl LlmConfigOverrides {
    fn complete(&self, user_id: &str) -> Option<LlmConfig> {
        Some(LlmConfig {
            api_key: present(&self.api_key)?.to_string(),
            model: present(&self.model)?.to_string(),
            provider: present(&self.provider)?.to_string(),
            user_id: user_id.to_string(),
        })
    }

    fn apply_to(&self, config: &mut LlmConfig) {
        if let Some(api_key) = present(&self.api_key) {
            config.api_key = api_key.to_string();
        }
        if let Some(model) = present(&self.model) {
            config.model = model.to_string();
        }
        if let Some(provider) = present(&self.provider) {
            config.provider = provider.to_string();
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

/// Errors raised while resolving per-user configuration.
#[derive(Debug, Error)]
pub enum LlmConfigError {
    /// Lookup was attempted without a user id.
    #[error("user id cannot be empty")]
    EmptyUserId,
    /// No configuration is stored for the user and none was supplied.
    #[error("no LLM configuration found for user {0}")]
    NotFound(String),
    /// Backing cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Resolves the configuration used for a user's completions.
#[async_trait]
pub trait LlmConfigResolver: Send + Sync {
    /// Configuration for `user_id`; absence is an error.
    async fn get(&self, user_id: &str) -> Result<LlmConfig, LlmConfigError>;
}

/// Cache-backed store of per-user LLM configuration.
#[derive(Clone)]
pub struct LlmConfigService {
    configs: TypedCache<LlmConfig>,
    ttl: Duration,
}

impl LlmConfigService {
    /// Store entries in `cache`, each living for `ttl`.
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            configs: TypedCache::new(cache),
            ttl,
        }
    }

    /// Store `config` for `user_id`, replacing any previous entry.
    pub async fn set_user_config(
        &self,
        user_id: &str,
        mut config: LlmConfig,
    ) -> Result<(), LlmConfigError> {
        if user_id.is_empty() {
            return Err(LlmConfigError::EmptyUserId);
        }
        config.user_id = user_id.to_string();
        self.configs.set(&cache_key(user_id), &config, self.ttl).await?;
        tracing::debug!(
            user_id,
            provider = %config.provider,
            model = %config.model,
            api_key = %api_key_fingerprint(&config.api_key),
            "Stored LLM configuration"
        );
        Ok(())
    }

    /// Remove the stored configuration for `user_id`.
    pub async fn delete(&self, user_id: &str) -> Result<(), LlmConfigError> {
        if user_id.is_empty() {
            return Err(LlmConfigError::EmptyUserId);
        }
        Ok(self.configs.delete(&cache_key(user_id)).await?)
    }

    /// Rewrite the stored entry so its lifetime starts over.
    pub async fn refresh_ttl(&self, user_id: &str) -> Result<(), LlmConfigError> {
        let config = self.get(user_id).await?;
        self.set_user_config(user_id, config).await
    }

    /// Prefer a complete request-supplied configuration, remembering it for later requests;
    /// otherwise fall back to the stored one with any supplied fields overriding it.
    pub async fn get_or_use_default(
        &self,
        user_id: &str,
        overrides: &LlmConfigOverrides,
    ) -> Result<LlmConfig, LlmConfigError> {
        if let Some(config) = overrides.complete(user_id) {
            let service = self.clone();
            let user = user_id.to_string();
            let stored = config.clone();
            spawn_detached("llm_config_write", async move {
                service.set_user_config(&user, stored).await
            });
            return Ok(config);
        }

        let mut config = self.get(user_id).await?;
        overrides.apply_to(&mut config);
        Ok(config)
    }
}

#[async_trait]
impl LlmConfigResolver for LlmConfigService {
    async fn get(&self, user_id: &str) -> Result<LlmConfig, LlmConfigError> {
        if user_id.is_empty() {
            return Err(LlmConfigError::EmptyUserId);
        }
        self.configs
            .get(&cache_key(user_id))
            .await?
            .ok_or_else(|| LlmConfigError::NotFound(user_id.to_string()))
    }
}

fn cache_key(user_id: &str) -> String {
    format!("llm_config:user:{user_id}")
}

/// Short, stable identifier for an API key that is safe to log.
pub fn api_key_fingerprint(api_key: &str) -> String {
    if api_key.is_empty() {
        return "<none>".to_string();
    }
    let digest = Sha256::digest(api_key.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(FINGERPRINT_HEX_CHARS);
    encoded
}
