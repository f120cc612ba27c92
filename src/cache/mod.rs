//! Key/value caching used for per-user configuration lookups.

mod memory;

pub use memory::MemoryCache;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Value could not be converted to or from its cached form.
    #[error("Failed to (de)serialize cached value: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Backend could not be reached.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// JSON-valued cache with per-entry expiry.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up a live entry.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Remove an entry if present.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Serde-typed view over a [`Cache`].
pub struct TypedCache<T> {
    inner: Arc<dyn Cache>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<T> TypedCache<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Wrap a cache backend.
    pub fn new(inner: Arc<dyn Cache>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Typed lookup.
    pub async fn get(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.inner.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Typed store.
    pub async fn set(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        let value = serde_json::to_value(value)?;
        self.inner.set(key, value, ttl).await
    }

    /// Remove an entry.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn typed_cache_round_trips_structs() {
        let cache: TypedCache<Sample> = TypedCache::new(Arc::new(MemoryCache::new(8)));
        let sample = Sample {
            name: "alpha".into(),
            count: 3,
        };
        cache
            .set("sample", &sample, Duration::from_secs(60))
            .await
            .expect("set");

        assert_eq!(cache.get("sample").await.expect("get"), Some(sample));
        cache.delete("sample").await.expect("delete");
        assert_eq!(cache.get("sample").await.expect("get"), None);
    }

    #[tokio::test]
    async fn typed_cache_reports_shape_mismatch() {
        let backend: Arc<dyn Cache> = Arc::new(MemoryCache::new(8));
        backend
            .set("sample", Value::from("not a struct"), Duration::from_secs(60))
            .await
            .expect("set");

        let cache: TypedCache<Sample> = TypedCache::new(backend);
        assert!(matches!(
            cache.get("sample").await,
            Err(CacheError::Serialization(_))
        ));
    }
}
