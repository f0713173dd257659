use super::{ContainerIndex, ContainerPlan, OverlapReport, Span, SpanBlock, SpanCache};
use crate::chain::HeightIndex;
use crate::config::CoreConfig;
use crate::models::DagBlock;
use crate::storage::{ContentClient, IndexStore};
use crate::{DagError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchedBlocks {
    /// Blocks keyed by cid.
    pub blocks: BTreeMap<String, DagBlock>,
    /// Heights that could not be read, ascending.
    pub missing: Vec<u64>,
}

impl FetchedBlocks {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalPlan {
    pub overlap: OverlapReport,
    pub containers: ContainerPlan,
}

/// Serves height-range queries from spans, warm containers and the
/// content store, in that order.
#[derive(Clone)]
pub struct RetrievalEngine {
    spans: SpanCache,
    containers: ContainerIndex,
    heights: HeightIndex,
    content: ContentClient,
}

impl RetrievalEngine {
    pub fn new(index: Arc<dyn IndexStore>, content: ContentClient, config: &CoreConfig) -> Self {
        Self {
            spans: SpanCache::new(index.clone(), config.span_expire_secs),
            containers: ContainerIndex::new(index.clone(), config.container_height),
            heights: HeightIndex::new(index),
            content,
        }
    }

    pub fn spans(&self) -> &SpanCache {
        &self.spans
    }

    pub fn containers(&self) -> &ContainerIndex {
        &self.containers
    }

    /// Reads every height of `[from, to]`, walking down from `to`.
    ///
    /// Content store misses, including timeouts, land in `missing` rather
    /// than failing the call.
    pub async fn fetch_blocks(
        &self,
        from_height: u64,
        to_height: u64,
        project_id: &str,
    ) -> Result<FetchedBlocks> {
        if from_height == 0 || from_height > to_height {
            return Err(DagError::InvalidRequest(format!(
                "invalid height range. from={} to={}",
                from_height, to_height
            )));
        }

        let overlap = self
            .spans
            .check_overlap(from_height, to_height, project_id)
            .await?;
        let last_pruned = self.heights.last_pruned_height(project_id).await?;

        // Each span is read once per call.
        let mut loaded: HashMap<&str, Option<Span>> = HashMap::new();
        let mut fetched = FetchedBlocks::default();
        for height in (from_height..=to_height).rev() {
            if let Some(span_id) = overlap.height_spans.get(&height) {
                if !loaded.contains_key(span_id.as_str()) {
                    let span = self.spans.load_span(project_id, span_id).await?;
                    loaded.insert(span_id.as_str(), span);
                }
                let cached = loaded
                    .get(span_id.as_str())
                    .and_then(|span| span.as_ref())
                    .and_then(|span| span.blocks.get(&height));
                if let Some(cached) = cached {
                    fetched
                        .blocks
                        .insert(cached.cid.clone(), cached.block.clone());
                    continue;
                }
                tracing::debug!(
                    "Span gone before read, falling back. project={} height={} span_id={}",
                    project_id,
                    height,
                    span_id
                );
            }

            let Some(cid) = self.heights.dag_cid(project_id, height).await? else {
                fetched.missing.push(height);
                continue;
            };

            if height <= last_pruned {
                if let Some(block) = self.read_from_container(project_id, height, &cid).await? {
                    fetched.blocks.insert(cid, block);
                    continue;
                }
            }

            match self.content.get_block(&cid).await {
                Some(block) => {
                    fetched.blocks.insert(cid, block);
                }
                None => fetched.missing.push(height),
            }
        }

        fetched.missing.sort_unstable();
        if !fetched.is_complete() {
            tracing::warn!(
                "Range partially resolved. project={} from={} to={} missing={:?}",
                project_id,
                from_height,
                to_height,
                fetched.missing
            );
        }
        Ok(fetched)
    }

    async fn read_from_container(
        &self,
        project_id: &str,
        height: u64,
        cid: &str,
    ) -> Result<Option<DagBlock>> {
        let Some(container) = self
            .containers
            .get_container_id(height, cid, project_id)
            .await?
        else {
            return Ok(None);
        };

        if !self.containers.check_container_cached(&container.id).await? {
            tracing::debug!(
                "Container cold, reading block directly. project={} height={} container={}",
                project_id,
                height,
                container.id
            );
            return Ok(None);
        }

        self.containers.cached_block(&container.id, cid).await
    }

    /// Fetches the range and caches it as a span when fully resolved.
    pub async fn retrieve(
        &self,
        from_height: u64,
        to_height: u64,
        project_id: &str,
    ) -> Result<FetchedBlocks> {
        let fetched = self.fetch_blocks(from_height, to_height, project_id).await?;
        if fetched.is_complete() {
            let blocks: BTreeMap<u64, SpanBlock> = fetched
                .blocks
                .iter()
                .map(|(cid, block)| {
                    (
                        block.height,
                        SpanBlock {
                            cid: cid.clone(),
                            block: block.clone(),
                        },
                    )
                })
                .collect();
            self.spans
                .save_span(from_height, to_height, project_id, blocks)
                .await?;
        }
        Ok(fetched)
    }

    /// What serving `[from, to]` would need: span coverage and the
    /// containers holding pruned heights.
    pub async fn plan(
        &self,
        from_height: u64,
        to_height: u64,
        project_id: &str,
    ) -> Result<RetrievalPlan> {
        let overlap = self
            .spans
            .check_overlap(from_height, to_height, project_id)
            .await?;
        let containers = self
            .containers
            .check_containers(from_height, to_height, project_id, &overlap.height_spans)
            .await?;

        Ok(RetrievalPlan {
            overlap,
            containers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BloomFilter;
    use crate::chain::{CreateBlockRequest, DagChainBuilder};
    use crate::keys;
    use crate::retrieval::ContainerRecord;
    use crate::storage::{MemoryContentStore, MemoryIndexStore};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts reads of live span records.
    struct CountingIndexStore {
        inner: Arc<MemoryIndexStore>,
        span_reads: AtomicUsize,
    }

    #[async_trait]
    impl IndexStore for CountingIndexStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            if key.starts_with(&keys::live_span("proj", "")) {
                self.span_reads.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<u64> {
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            self.inner.exists(key).await
        }

        async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
            self.inner.expire(key, seconds).await
        }

        async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
            self.inner.keys(pattern).await
        }

        async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
            self.inner.hset(key, field, value).await
        }

        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
            self.inner.hgetall(key).await
        }

        async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<u64> {
            self.inner.zadd(key, member, score).await
        }

        async fn zrem(&self, key: &str, member: &str) -> Result<u64> {
            self.inner.zrem(key, member).await
        }

        async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64> {
            self.inner.zremrangebyscore(key, min, max).await
        }

        async fn zrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>> {
            self.inner.zrangebyscore(key, min, max).await
        }

        async fn zrangebyscore_withscores(
            &self,
            key: &str,
            min: i64,
            max: i64,
        ) -> Result<Vec<(String, i64)>> {
            self.inner.zrangebyscore_withscores(key, min, max).await
        }

        async fn zrevrange_withscores(
            &self,
            key: &str,
            start: isize,
            stop: isize,
        ) -> Result<Vec<(String, i64)>> {
            self.inner.zrevrange_withscores(key, start, stop).await
        }
    }

    struct Fixture {
        index: Arc<MemoryIndexStore>,
        content: Arc<MemoryContentStore>,
        engine: RetrievalEngine,
        cids: Vec<String>,
    }

    async fn fixture(chain_length: u64) -> Fixture {
        let index = Arc::new(MemoryIndexStore::new());
        let content = Arc::new(MemoryContentStore::new());
        let client = ContentClient::new(content.clone(), Duration::from_millis(200));
        let builder = DagChainBuilder::new(index.clone(), client.clone());

        let mut cids = Vec::new();
        for height in 1..=chain_length {
            let created = builder
                .create_block(CreateBlockRequest {
                    tx_hash: format!("0x{}", height),
                    project_id: "proj".to_string(),
                    tentative_height: height,
                    payload_cid: format!("payload-{}", height),
                    timestamp: 1000 + height as i64,
                })
                .await
                .unwrap();
            cids.push(created.cid);
        }

        let engine = RetrievalEngine::new(index.clone(), client, &CoreConfig::default());
        Fixture {
            index,
            content,
            engine,
            cids,
        }
    }

    #[tokio::test]
    async fn test_fetch_blocks_keyed_by_cid() {
        let fixture = fixture(5).await;
        let fetched = fixture.engine.fetch_blocks(2, 4, "proj").await.unwrap();
        assert!(fetched.is_complete());
        assert_eq!(fetched.blocks.len(), 3);
        for height in 2..=4u64 {
            let block = &fetched.blocks[&fixture.cids[height as usize - 1]];
            assert_eq!(block.height, height);
        }

        assert!(fixture.engine.fetch_blocks(4, 2, "proj").await.is_err());
        assert!(fixture.engine.fetch_blocks(0, 2, "proj").await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_blocks_is_idempotent() {
        let fixture = fixture(6).await;
        let first = fixture.engine.fetch_blocks(1, 6, "proj").await.unwrap();
        let second = fixture.engine.fetch_blocks(1, 6, "proj").await.unwrap();
        assert_eq!(first, second);

        // Same answer once part of the range is served from a span.
        fixture.engine.retrieve(2, 4, "proj").await.unwrap();
        let third = fixture.engine.fetch_blocks(1, 6, "proj").await.unwrap();
        let fourth = fixture.engine.fetch_blocks(1, 6, "proj").await.unwrap();
        assert_eq!(third, first);
        assert_eq!(third, fourth);
    }

    #[tokio::test]
    async fn test_span_read_once_per_fetch() {
        let fixture = fixture(8).await;
        fixture.engine.retrieve(2, 7, "proj").await.unwrap();

        let counting = Arc::new(CountingIndexStore {
            inner: fixture.index.clone(),
            span_reads: AtomicUsize::new(0),
        });
        let client = ContentClient::new(fixture.content.clone(), Duration::from_millis(200));
        let engine = RetrievalEngine::new(counting.clone(), client, &CoreConfig::default());

        let fetched = engine.fetch_blocks(1, 8, "proj").await.unwrap();
        assert!(fetched.is_complete());
        assert_eq!(fetched.blocks.len(), 8);
        // One read for the overlap scan, one for serving six heights.
        assert_eq!(counting.span_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retrieve_saves_span_and_serves_from_it() {
        let fixture = fixture(4).await;
        fixture.engine.retrieve(1, 4, "proj").await.unwrap();

        let report = fixture.engine.spans().check_overlap(1, 4, "proj").await.unwrap();
        assert_eq!(report.max_overlap, 100.0);

        // Content store now times out; the span still answers.
        fixture.content.set_read_delay(Some(Duration::from_secs(1)));
        let fetched = fixture.engine.fetch_blocks(1, 4, "proj").await.unwrap();
        assert!(fetched.is_complete());
        assert_eq!(fetched.blocks.len(), 4);

        let uncovered = fixture.engine.retrieve(1, 6, "proj").await.unwrap();
        assert_eq!(uncovered.missing, vec![5, 6]);
        let report = fixture.engine.spans().check_overlap(1, 6, "proj").await.unwrap();
        assert!(report.max_overlap < 100.0);
    }

    #[tokio::test]
    async fn test_pruned_heights_read_from_warm_container() {
        let fixture = fixture(6).await;
        let pruned: Vec<String> = fixture.cids[..3].to_vec();
        let mut filter = BloomFilter::new(10, 0.001).unwrap();
        for cid in &pruned {
            filter.insert(cid.as_bytes());
        }
        fixture
            .engine
            .containers()
            .register_container(
                "proj",
                &ContainerRecord {
                    id: "c1".to_string(),
                    from_height: 1,
                    to_height: 3,
                    container_cid: "container".to_string(),
                    bloom_filter: filter.to_settings(),
                },
            )
            .await
            .unwrap();
        fixture
            .index
            .set(&keys::last_pruned_height("proj"), "3")
            .await
            .unwrap();

        let plan = fixture.engine.plan(1, 6, "proj").await.unwrap();
        assert_eq!(plan.containers.required["c1"].heights, vec![1, 2, 3]);
        assert!(!plan.containers.required["c1"].cached);

        let client = ContentClient::new(fixture.content.clone(), Duration::from_secs(1));
        let mut warm = HashMap::new();
        for cid in &pruned {
            warm.insert(cid.clone(), client.get_block(cid).await.unwrap());
        }
        fixture
            .index
            .set(
                &keys::cached_container("c1"),
                &serde_json::to_string(&warm).unwrap(),
            )
            .await
            .unwrap();

        // Pruned heights come from the container, live ones time out.
        fixture.content.set_read_delay(Some(Duration::from_secs(1)));
        let fetched = fixture.engine.fetch_blocks(1, 6, "proj").await.unwrap();
        assert_eq!(fetched.blocks.len(), 3);
        assert_eq!(fetched.missing, vec![4, 5, 6]);
    }
}
