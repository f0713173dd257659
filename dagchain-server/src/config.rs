use dagchain_core::{
    ContentStore, ContentStoreBuilder, CoreConfig, DagError, IndexStore, IndexStoreBuilder,
    Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub index_store: IndexStoreConfig,
    pub content_store: ContentStoreConfig,
    #[serde(default)]
    pub core: CoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentBackend {
    Ipfs,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStoreConfig {
    pub backend: IndexBackend,
    pub redis: Option<RedisConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentStoreConfig {
    pub backend: ContentBackend,
    pub ipfs: Option<IpfsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    pub url: String,
}

impl ServerConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("DAGCHAIN").separator("__"))
            .build()
            .map_err(|e| DagError::Config(e.to_string()))?;

        let config: ServerConfig = settings
            .try_deserialize()
            .map_err(|e| DagError::Config(e.to_string()))?;

        Ok(config)
    }

    pub async fn open_index_store(&self) -> Result<Arc<dyn IndexStore>> {
        let mut builder = IndexStoreBuilder::new();
        builder = match self.index_store.backend {
            IndexBackend::Redis => {
                let redis = self.index_store.redis.as_ref().ok_or_else(|| {
                    DagError::Config(
                        "redis configuration is required for redis backend".to_string(),
                    )
                })?;
                builder.backend("redis").redis_url(redis.url.clone())
            }
            IndexBackend::Memory => builder.backend("memory"),
        };
        builder.build().await
    }

    pub fn open_content_store(&self) -> Result<Arc<dyn ContentStore>> {
        let mut builder = ContentStoreBuilder::new();
        builder = match self.content_store.backend {
            ContentBackend::Ipfs => {
                let ipfs = self.content_store.ipfs.as_ref().ok_or_else(|| {
                    DagError::Config("ipfs configuration is required for ipfs backend".to_string())
                })?;
                builder.backend("ipfs").ipfs_url(ipfs.url.clone())
            }
            ContentBackend::Memory => builder.backend("memory"),
        };
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_yaml_with_core_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "index_store:\n  backend: memory\ncontent_store:\n  backend: memory\ncore:\n  span_expire_secs: 30\n",
        )
        .unwrap();

        let config = ServerConfig::from_file(path.to_str().unwrap()).unwrap();

        assert_eq!(config.core.span_expire_secs, 30);
        assert_eq!(config.core.indexer.interval_secs, 120);
        assert!(config.open_index_store().await.is_ok());
        assert!(config.open_content_store().is_ok());
    }

    #[tokio::test]
    async fn test_redis_backend_requires_url() {
        let config = ServerConfig {
            index_store: IndexStoreConfig {
                backend: IndexBackend::Redis,
                redis: None,
            },
            content_store: ContentStoreConfig {
                backend: ContentBackend::Ipfs,
                ipfs: None,
            },
            core: CoreConfig::default(),
        };
        assert!(matches!(config.open_index_store().await, Err(DagError::Config(_))));
        assert!(matches!(config.open_content_store(), Err(DagError::Config(_))));
    }
}
