use crate::storage::IndexStore;
use crate::{DagError, Result, keys};
use std::sync::Arc;

/// Read side of the per-project height index.
#[derive(Clone)]
pub struct HeightIndex {
    index: Arc<dyn IndexStore>,
}

impl HeightIndex {
    pub fn new(index: Arc<dyn IndexStore>) -> Self {
        Self { index }
    }

    /// Block cid stored at `height`, if any.
    pub async fn dag_cid(&self, project_id: &str, height: u64) -> Result<Option<String>> {
        let score = height as i64;
        let cids = self
            .index
            .zrangebyscore(&keys::dag_cids(project_id), score, score)
            .await?;

        if cids.len() > 1 {
            tracing::warn!(
                "multiple block cids indexed at one height. project={} height={} count={}",
                project_id,
                height,
                cids.len()
            );
        }

        Ok(cids.into_iter().next())
    }

    /// `(cid, height)` pairs over an inclusive height range, ascending.
    pub async fn dag_cids_in_range(
        &self,
        project_id: &str,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<(String, u64)>> {
        let rows = self
            .index
            .zrangebyscore_withscores(
                &keys::dag_cids(project_id),
                from_height as i64,
                to_height as i64,
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter(|(_, score)| *score > 0)
            .map(|(cid, score)| (cid, score as u64))
            .collect())
    }

    /// Scalar max height, `None` when the project has no chain yet.
    pub async fn max_height(&self, project_id: &str) -> Result<Option<u64>> {
        let key = keys::block_height(project_id);
        match self.index.get(&key).await? {
            Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
                DagError::IndexInconsistency(format!(
                    "unparseable max height. project={} value={}",
                    project_id, raw
                ))
            }),
            None => Ok(None),
        }
    }

    /// Max height, failing when the pointer is missing.
    pub async fn require_max_height(&self, project_id: &str) -> Result<u64> {
        self.max_height(project_id).await?.ok_or_else(|| {
            DagError::IndexInconsistency(format!("missing max height. project={}", project_id))
        })
    }

    /// Highest height present in the height->cid set, which can run ahead
    /// of the scalar max height if a block write was interrupted.
    pub async fn top_indexed_height(&self, project_id: &str) -> Result<Option<u64>> {
        let top = self
            .index
            .zrevrange_withscores(&keys::dag_cids(project_id), 0, 0)
            .await?;
        Ok(top
            .into_iter()
            .next()
            .map(|(_, score)| score.max(0) as u64))
    }

    pub async fn last_dag_cid(&self, project_id: &str) -> Result<Option<String>> {
        self.index.get(&keys::last_dag_cid(project_id)).await
    }

    /// Highest height already compacted into containers; `0` when nothing
    /// has been pruned.
    pub async fn last_pruned_height(&self, project_id: &str) -> Result<u64> {
        let raw = self.index.get(&keys::last_pruned_height(project_id)).await?;
        Ok(raw
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0))
    }
}
