use crate::chain::HeightIndex;
use crate::config::IndexerConfig;
use crate::models::{SlidingWindowMarker, TimePeriod};
use crate::storage::{ContentClient, IndexStore};
use crate::{DagError, Result, keys};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// No markers existed; both were written.
    Seeded(SlidingWindowMarker),
    Advanced {
        previous_tail: u64,
        marker: SlidingWindowMarker,
    },
}

impl IndexOutcome {
    pub fn marker(&self) -> SlidingWindowMarker {
        match self {
            Self::Seeded(marker) => *marker,
            Self::Advanced { marker, .. } => *marker,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
struct IndexRequest {
    #[serde(default)]
    series: Vec<String>,
}

/// Keeps a `[tail, head]` marker per project and period such that every
/// block in it is within the period of the head block's timestamp.
#[derive(Clone)]
pub struct SlidingWindowIndexer {
    index: Arc<dyn IndexStore>,
    content: ContentClient,
    heights: HeightIndex,
    config: IndexerConfig,
}

impl SlidingWindowIndexer {
    pub fn new(index: Arc<dyn IndexStore>, content: ContentClient, config: IndexerConfig) -> Self {
        Self {
            heights: HeightIndex::new(index.clone()),
            index,
            content,
            config,
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    async fn block_timestamp(&self, project_id: &str, height: u64) -> Result<i64> {
        let cid = self.heights.dag_cid(project_id, height).await?.ok_or_else(|| {
            DagError::IndexInconsistency(format!(
                "no block indexed. project={} height={}",
                project_id, height
            ))
        })?;
        let block = self.content.get_block(&cid).await.ok_or_else(|| {
            DagError::DataInsufficiency(format!(
                "block unreadable. project={} height={} cid={}",
                project_id, height, cid
            ))
        })?;
        Ok(block.timestamp)
    }

    /// First height at or above `start` whose block is within `period` of
    /// the head block. The head itself is never returned.
    async fn scan_tail(
        &self,
        project_id: &str,
        head: u64,
        start: u64,
        period: TimePeriod,
    ) -> Result<Option<u64>> {
        let head_timestamp = self.block_timestamp(project_id, head).await?;
        let mut current = start.max(1);
        while current < head {
            let timestamp = self.block_timestamp(project_id, current).await?;
            if head_timestamp - timestamp <= period.seconds() {
                return Ok(Some(current));
            }
            current += 1;
        }
        Ok(None)
    }

    pub async fn find_tail(&self, project_id: &str, head: u64, period: TimePeriod) -> Result<Option<u64>> {
        self.scan_tail(project_id, head, 1, period).await
    }

    /// Like [`Self::find_tail`] but resumes from the previous tail, so the
    /// tail never moves backward.
    pub async fn seek_ahead_tail(
        &self,
        project_id: &str,
        head: u64,
        tail: u64,
        period: TimePeriod,
    ) -> Result<Option<u64>> {
        self.scan_tail(project_id, head, tail, period).await
    }

    /// Stored markers, `None` unless both are present and readable.
    pub async fn markers(&self, project_id: &str, period: TimePeriod) -> Result<Option<SlidingWindowMarker>> {
        let head = self
            .index
            .get(&keys::sliding_window_head(project_id, period.label()))
            .await?;
        let tail = self
            .index
            .get(&keys::sliding_window_tail(project_id, period.label()))
            .await?;

        let parse = |raw: Option<String>| raw.and_then(|value| value.trim().parse::<u64>().ok());
        match (parse(head), parse(tail)) {
            (Some(head), Some(tail)) if head > 0 && tail > 0 => {
                Ok(Some(SlidingWindowMarker { head, tail }))
            }
            _ => Ok(None),
        }
    }

    async fn store_markers(&self, project_id: &str, period: TimePeriod, marker: SlidingWindowMarker) -> Result<()> {
        self.index
            .set(
                &keys::sliding_window_head(project_id, period.label()),
                &marker.head.to_string(),
            )
            .await?;
        self.index
            .set(
                &keys::sliding_window_tail(project_id, period.label()),
                &marker.tail.to_string(),
            )
            .await
    }

    /// Recomputes one project's marker for `period`. On failure the stored
    /// markers are left as they were.
    pub async fn build_index(&self, project_id: &str, period: TimePeriod) -> Result<IndexOutcome> {
        let head = self.heights.require_max_height(project_id).await?;

        match self.markers(project_id, period).await? {
            None => {
                tracing::info!(
                    "Finding tail marker for the first time. project={} period={}",
                    project_id,
                    period
                );
                let tail = self.find_tail(project_id, head, period).await?.ok_or_else(|| {
                    DagError::DataInsufficiency(format!(
                        "not enough blocks for window. project={} period={} head={}",
                        project_id, period, head
                    ))
                })?;

                let marker = SlidingWindowMarker { head, tail };
                self.store_markers(project_id, period, marker).await?;
                tracing::info!(
                    "Seeded window markers. project={} period={} head={} tail={}",
                    project_id,
                    period,
                    head,
                    tail
                );
                Ok(IndexOutcome::Seeded(marker))
            }
            Some(previous) => {
                let tail = self
                    .seek_ahead_tail(project_id, head, previous.tail, period)
                    .await?
                    .ok_or_else(|| {
                        DagError::DataInsufficiency(format!(
                            "cannot seek tail ahead. project={} period={} head={} tail={}",
                            project_id, period, head, previous.tail
                        ))
                    })?;

                let marker = SlidingWindowMarker { head, tail };
                self.store_markers(project_id, period, marker).await?;
                tracing::debug!(
                    "Advanced window markers. project={} period={} head={} tail={} previous_tail={}",
                    project_id,
                    period,
                    head,
                    tail,
                    previous.tail
                );
                Ok(IndexOutcome::Advanced {
                    previous_tail: previous.tail,
                    marker,
                })
            }
        }
    }

    /// `(project, period)` pairs registered for indexing.
    pub async fn requested_indexes(&self) -> Result<Vec<(String, TimePeriod)>> {
        let registry = self.index.hgetall(keys::INDEXES_REQUESTED).await?;

        let mut requested = Vec::new();
        for (project_id, raw) in registry {
            let request: IndexRequest = match serde_json::from_str(&raw) {
                Ok(request) => request,
                Err(error) => {
                    tracing::error!(
                        "Skipping unparseable index request. project={} error={}",
                        project_id,
                        error
                    );
                    continue;
                }
            };

            for label in &request.series {
                let period = TimePeriod::from_label(label);
                if !requested.contains(&(project_id.clone(), period)) {
                    requested.push((project_id.clone(), period));
                }
            }
        }

        requested.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.seconds().cmp(&b.1.seconds())));
        Ok(requested)
    }

    /// One pass over every registered index, at most `max_concurrency` at a
    /// time. A failing project does not stop the others.
    pub async fn build_all(&self) -> Result<CycleReport> {
        let requested = self.requested_indexes().await?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut handles = Vec::with_capacity(requested.len());
        for (project_id, period) in requested {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|error| DagError::Internal(error.to_string()))?;
            let indexer = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                match indexer.build_index(&project_id, period).await {
                    Ok(_) => true,
                    Err(error) => {
                        tracing::error!(
                            "Window index failed. project={} period={} error={}",
                            project_id,
                            period,
                            error
                        );
                        false
                    }
                }
            }));
        }

        let mut report = CycleReport::default();
        for result in futures_util::future::join_all(handles).await {
            match result {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.failed += 1,
                Err(error) => {
                    tracing::error!("Window index task aborted. error={}", error);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Runs [`Self::build_all`] alongside the interval sleep, so cycles start
    /// at most once per interval.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let (report, _) = tokio::join!(self.build_all(), tokio::time::sleep(self.config.interval()));
        let report = report?;
        tracing::debug!(
            "Finished indexing cycle. succeeded={} failed={}",
            report.succeeded,
            report.failed
        );
        Ok(report)
    }

    pub async fn run_forever(self) -> Result<()> {
        loop {
            self.run_cycle().await?;
        }
    }
}
