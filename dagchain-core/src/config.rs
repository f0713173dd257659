use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by every core component.
///
/// Built once by the caller and handed to each constructor; nothing in the
/// core reads process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Deadline applied to every content store read.
    #[serde(default = "default_content_timeout_secs")]
    pub content_timeout_secs: u64,
    /// Lifetime of a cached span.
    #[serde(default = "default_span_expire_secs")]
    pub span_expire_secs: u64,
    /// Number of chain heights compacted into one container.
    #[serde(default = "default_container_height")]
    pub container_height: u64,
    #[serde(default)]
    pub indexer: IndexerConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            content_timeout_secs: default_content_timeout_secs(),
            span_expire_secs: default_span_expire_secs(),
            container_height: default_container_height(),
            indexer: IndexerConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn content_timeout(&self) -> Duration {
        Duration::from_secs(self.content_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_concurrency: default_max_concurrency(),
            restart_delay_ms: default_restart_delay_ms(),
        }
    }
}

impl IndexerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

fn default_content_timeout_secs() -> u64 {
    5
}

fn default_span_expire_secs() -> u64 {
    300
}

fn default_container_height() -> u64 {
    100
}

fn default_interval_secs() -> u64 {
    120
}

fn default_max_concurrency() -> usize {
    20
}

fn default_restart_delay_ms() -> u64 {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"span_expire_secs": 60, "indexer": {"max_concurrency": 4}}"#)
                .unwrap();
        assert_eq!(config.span_expire_secs, 60);
        assert_eq!(config.content_timeout_secs, 5);
        assert_eq!(config.indexer.max_concurrency, 4);
        assert_eq!(config.indexer.interval_secs, 120);
    }
}
