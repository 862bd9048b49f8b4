//! Key-value cache accessor over a (namespace, key) address

use super::{bounded, CacheBackend};
use crate::error::{NbError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    timeout: Duration,
    namespace: Option<String>,
    key: Option<String>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend.kind())
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .finish()
    }
}

impl Cache {
    pub(crate) fn new(backend: Arc<dyn CacheBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            namespace: None,
            key: None,
        }
    }

    pub fn namespace(&self, namespace: impl Into<String>) -> Result<Self> {
        if let Some(existing) = &self.namespace {
            return Err(NbError::usage(format!(
                "cache namespace already set to {existing}"
            )));
        }
        let mut next = self.clone();
        next.namespace = Some(namespace.into());
        Ok(next)
    }

    pub fn key(&self, key: impl Into<String>) -> Result<Self> {
        if self.namespace.is_none() {
            return Err(NbError::usage("cache key set before a namespace"));
        }
        if self.key.is_some() {
            return Err(NbError::usage("cache key already set"));
        }
        let mut next = self.clone();
        next.key = Some(key.into());
        Ok(next)
    }

    fn address(&self) -> Result<(&str, &str)> {
        match (&self.namespace, &self.key) {
            (Some(namespace), Some(key)) => Ok((namespace, key)),
            _ => Err(NbError::usage(
                "cache namespace and key must be set before access",
            )),
        }
    }

    /// Stored value, `None` when the key was never written or was deleted
    pub async fn get(&self) -> Result<Option<String>> {
        let (namespace, key) = self.address()?;
        bounded(self.timeout, "cache get", self.backend.get(namespace, key)).await
    }

    pub async fn save(&self, value: &str) -> Result<()> {
        let (namespace, key) = self.address()?;
        bounded(
            self.timeout,
            "cache save",
            self.backend.set(namespace, key, value),
        )
        .await
    }

    pub async fn delete(&self) -> Result<()> {
        let (namespace, key) = self.address()?;
        bounded(self.timeout, "cache delete", self.backend.delete(namespace, key)).await
    }

    pub async fn exist(&self) -> Result<bool> {
        let (namespace, key) = self.address()?;
        bounded(self.timeout, "cache exist", self.backend.exists(namespace, key)).await
    }

    /// Read and decode a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.get().await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub async fn save_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.save(&text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteCache;
    use serde_json::json;

    async fn cache() -> Cache {
        let backend = SqliteCache::connect_in_memory().await.unwrap();
        Cache::new(Arc::new(backend), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_address_rules() {
        let c = cache().await;
        assert!(matches!(c.key("k"), Err(NbError::Usage(_))));
        assert!(matches!(c.get().await, Err(NbError::Usage(_))));

        let ns = c.namespace("ns").unwrap();
        assert!(matches!(ns.namespace("other"), Err(NbError::Usage(_))));
        assert!(matches!(ns.exist().await, Err(NbError::Usage(_))));

        let addr = ns.key("k").unwrap();
        assert!(matches!(addr.key("again"), Err(NbError::Usage(_))));
        assert!(!addr.exist().await.unwrap());
    }

    #[tokio::test]
    async fn test_never_written_is_absent() {
        let c = cache().await.namespace("fresh").unwrap().key("nothing").unwrap();
        assert_eq!(c.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_values() {
        let c = cache().await.namespace("json").unwrap().key("doc").unwrap();
        c.save_json(&json!({"a": 1})).await.unwrap();
        let back: serde_json::Value = c.get_json().await.unwrap().unwrap();
        assert_eq!(back, json!({"a": 1}));

        c.save("not json").await.unwrap();
        let err = c.get_json::<serde_json::Value>().await.unwrap_err();
        assert!(matches!(err, NbError::Serialization(_)));

        c.delete().await.unwrap();
        assert!(c.get_json::<serde_json::Value>().await.unwrap().is_none());
    }
}
