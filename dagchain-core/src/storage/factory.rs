use super::{
    ContentStore, IndexStore, IpfsContentStore, MemoryContentStore, MemoryIndexStore,
    RedisIndexStore,
};
use crate::{DagError, Result};
use std::sync::Arc;

fn resolve_backend(backend: Option<&str>, kind: &str) -> Result<String> {
    let backend = backend.unwrap_or_default().trim().to_ascii_lowercase();
    if backend.is_empty() {
        return Err(DagError::Config(format!("{} backend cannot be empty", kind)));
    }

    Ok(backend)
}

#[derive(Debug, Clone, Default)]
pub struct IndexStoreBuilder {
    backend: Option<String>,
    redis_url: Option<String>,
}

impl IndexStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub async fn build(&self) -> Result<Arc<dyn IndexStore>> {
        let backend = resolve_backend(self.backend.as_deref(), "index store")?;

        match backend.as_str() {
            "redis" => {
                let url = self.redis_url.as_deref().unwrap_or_default().trim();
                if url.is_empty() {
                    return Err(DagError::Config(
                        "redis url is required for redis backend".to_string(),
                    ));
                }

                let store = RedisIndexStore::new(url).await?;
                Ok(Arc::new(store))
            }
            "memory" => Ok(Arc::new(MemoryIndexStore::new())),
            other => Err(DagError::Config(format!(
                "unsupported index store backend: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentStoreBuilder {
    backend: Option<String>,
    ipfs_url: Option<String>,
}

impl ContentStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn ipfs_url(mut self, url: impl Into<String>) -> Self {
        self.ipfs_url = Some(url.into());
        self
    }

    pub fn build(&self) -> Result<Arc<dyn ContentStore>> {
        let backend = resolve_backend(self.backend.as_deref(), "content store")?;

        match backend.as_str() {
            "ipfs" => {
                let url = self.ipfs_url.as_deref().unwrap_or_default();
                Ok(Arc::new(IpfsContentStore::new(url)?))
            }
            "memory" => Ok(Arc::new(MemoryContentStore::new())),
            other => Err(DagError::Config(format!(
                "unsupported content store backend: {}",
                other
            ))),
        }
    }
}
