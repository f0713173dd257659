use crate::bloom::{BloomFilter, BloomFilterSettings};
use crate::chain::HeightIndex;
use crate::models::DagBlock;
use crate::storage::IndexStore;
use crate::{DagError, Result, keys};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A compacted batch of pruned blocks, as published in `containerData:{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerRecord {
    pub id: String,
    pub from_height: u64,
    pub to_height: u64,
    pub container_cid: String,
    pub bloom_filter: BloomFilterSettings,
}

impl ContainerRecord {
    fn from_fields(id: &str, fields: &HashMap<String, String>) -> Result<Self> {
        let field = |name: &str| {
            fields.get(name).ok_or_else(|| {
                DagError::IndexInconsistency(format!(
                    "container record missing field. container={} field={}",
                    id, name
                ))
            })
        };
        let height = |name: &str| -> Result<u64> {
            field(name)?.parse::<u64>().map_err(|_| {
                DagError::IndexInconsistency(format!(
                    "container height is not a number. container={} field={}",
                    id, name
                ))
            })
        };

        Ok(Self {
            id: id.to_string(),
            from_height: height("fromHeight")?,
            to_height: height("toHeight")?,
            container_cid: field("containerCid")?.clone(),
            bloom_filter: serde_json::from_str(field("bloomFilterSettings")?)?,
        })
    }

    /// Height distance from `height` to this container's declared range.
    fn distance(&self, height: u64) -> u64 {
        if height < self.from_height {
            self.from_height - height
        } else {
            height.saturating_sub(self.to_height)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequiredContainer {
    pub container: ContainerRecord,
    pub cached: bool,
    pub heights: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerPlan {
    pub required: BTreeMap<String, RequiredContainer>,
    /// Pruned heights no container claimed.
    pub unresolved: Vec<u64>,
}

/// Bloom-filter addressed lookup into compacted history.
#[derive(Clone)]
pub struct ContainerIndex {
    index: Arc<dyn IndexStore>,
    heights: HeightIndex,
    container_height: u64,
}

impl ContainerIndex {
    pub fn new(index: Arc<dyn IndexStore>, container_height: u64) -> Self {
        Self {
            heights: HeightIndex::new(index.clone()),
            index,
            container_height,
        }
    }

    /// Publishes a container record and registers it under the project.
    pub async fn register_container(&self, project_id: &str, record: &ContainerRecord) -> Result<()> {
        let key = keys::container_data(&record.id);
        self.index
            .hset(&key, "fromHeight", &record.from_height.to_string())
            .await?;
        self.index
            .hset(&key, "toHeight", &record.to_height.to_string())
            .await?;
        self.index
            .hset(&key, "containerCid", &record.container_cid)
            .await?;
        self.index
            .hset(
                &key,
                "bloomFilterSettings",
                &serde_json::to_string(&record.bloom_filter)?,
            )
            .await?;
        self.index
            .zadd(
                &keys::containers(project_id),
                &record.id,
                record.to_height as i64,
            )
            .await?;
        Ok(())
    }

    /// Container whose bloom filter claims `cid`, searching containers that
    /// end within two container spans of `height`.
    ///
    /// A positive filter answer is trusted as-is. Candidates are tried
    /// nearest range first so the real owner is asked before its neighbours.
    pub async fn get_container_id(
        &self,
        height: u64,
        cid: &str,
        project_id: &str,
    ) -> Result<Option<ContainerRecord>> {
        let window = (self.container_height * 2 + 1) as i64;
        let center = height as i64;
        let ids = self
            .index
            .zrangebyscore(&keys::containers(project_id), center - window, center + window)
            .await?;

        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            let fields = self.index.hgetall(&keys::container_data(&id)).await?;
            match ContainerRecord::from_fields(&id, &fields) {
                Ok(record) => candidates.push(record),
                Err(error) => tracing::error!(
                    "Skipping container record. project={} container={} error={}",
                    project_id,
                    id,
                    error
                ),
            }
        }
        candidates.sort_by_key(|record| record.distance(height));

        for record in candidates {
            match BloomFilter::from_settings(&record.bloom_filter) {
                Ok(filter) if filter.contains(cid.as_bytes()) => return Ok(Some(record)),
                Ok(_) => {}
                Err(error) => tracing::error!(
                    "Unusable bloom filter. project={} container={} error={}",
                    project_id,
                    record.id,
                    error
                ),
            }
        }

        Ok(None)
    }

    pub async fn check_container_cached(&self, container_id: &str) -> Result<bool> {
        self.index
            .exists(&keys::cached_container(container_id))
            .await
    }

    /// Block `cid` out of a warm container payload.
    pub async fn cached_block(&self, container_id: &str, cid: &str) -> Result<Option<DagBlock>> {
        let Some(raw) = self
            .index
            .get(&keys::cached_container(container_id))
            .await?
        else {
            return Ok(None);
        };

        let mut blocks: HashMap<String, DagBlock> = serde_json::from_str(&raw)?;
        Ok(blocks.remove(cid))
    }

    /// Containers needed to serve the pruned part of `[from, to]`.
    ///
    /// Heights above the retention boundary and heights a span already
    /// covers are skipped.
    pub async fn check_containers(
        &self,
        from_height: u64,
        to_height: u64,
        project_id: &str,
        height_spans: &BTreeMap<u64, String>,
    ) -> Result<ContainerPlan> {
        let last_pruned = self.heights.last_pruned_height(project_id).await?;
        let cids = self
            .heights
            .dag_cids_in_range(project_id, from_height, to_height)
            .await?;

        let mut plan = ContainerPlan::default();
        for (cid, height) in cids {
            if height > last_pruned || height_spans.contains_key(&height) {
                continue;
            }

            let Some(container) = self.get_container_id(height, &cid, project_id).await? else {
                tracing::warn!(
                    "No container claims pruned block. project={} height={} cid={}",
                    project_id,
                    height,
                    cid
                );
                plan.unresolved.push(height);
                continue;
            };

            if let Some(required) = plan.required.get_mut(&container.id) {
                required.heights.push(height);
                continue;
            }

            let cached = self.check_container_cached(&container.id).await?;
            plan.required.insert(
                container.id.clone(),
                RequiredContainer {
                    container,
                    cached,
                    heights: vec![height],
                },
            );
        }

        Ok(plan)
    }
}
