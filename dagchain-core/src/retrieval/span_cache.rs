use crate::models::DagBlock;
use crate::storage::IndexStore;
use crate::{DagError, Result, keys};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanBlock {
    pub cid: String,
    pub block: DagBlock,
}

/// Cached assembly of a contiguous height range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    #[serde(rename = "fromHeight")]
    pub from_height: u64,
    #[serde(rename = "toHeight")]
    pub to_height: u64,
    /// Milliseconds since the epoch.
    #[serde(rename = "createdAt", default)]
    pub created_at: i64,
    #[serde(rename = "dag_blocks", default)]
    pub blocks: BTreeMap<u64, SpanBlock>,
}

impl Span {
    pub fn covers(&self, height: u64) -> bool {
        self.from_height <= height && height <= self.to_height
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlapReport {
    pub max_overlap: f64,
    pub max_span_id: Option<String>,
    /// For each queried height, the span that fully covers it.
    pub height_spans: BTreeMap<u64, String>,
}

#[derive(Serialize)]
struct SpanIdentity<'a> {
    #[serde(rename = "fromHeight")]
    from_height: u64,
    #[serde(rename = "toHeight")]
    to_height: u64,
    #[serde(rename = "projectId")]
    project_id: &'a str,
}

/// Percentage of `query` covered by `span`. Relative to the query range, so
/// not symmetric in its arguments.
pub fn check_intersection(query: (u64, u64), span: (u64, u64)) -> f64 {
    let (query_from, query_to) = query;
    if query_to < query_from {
        return 0.0;
    }

    let low = query_from.max(span.0);
    let high = query_to.min(span.1);
    let overlap = if high >= low { high - low + 1 } else { 0 };
    overlap as f64 / (query_to - query_from + 1) as f64 * 100.0
}

pub fn span_id(from_height: u64, to_height: u64, project_id: &str) -> Result<String> {
    let identity = serde_json::to_vec(&SpanIdentity {
        from_height,
        to_height,
        project_id,
    })?;
    Ok(hex::encode(Sha256::digest(&identity)))
}

#[derive(Clone)]
pub struct SpanCache {
    index: Arc<dyn IndexStore>,
    expire_secs: u64,
}

impl SpanCache {
    pub fn new(index: Arc<dyn IndexStore>, expire_secs: u64) -> Self {
        Self { index, expire_secs }
    }

    /// Live spans of a project, newest first.
    pub async fn live_spans(&self, project_id: &str) -> Result<Vec<(String, Span)>> {
        let span_keys = self.index.keys(&keys::live_spans_pattern(project_id)).await?;

        let mut spans = Vec::with_capacity(span_keys.len());
        for key in span_keys {
            // Expired between listing and reading.
            let Some(raw) = self.index.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<Span>(&raw) {
                Ok(span) => spans.push((keys::span_id_from_key(&key).to_string(), span)),
                Err(error) => {
                    tracing::error!("Skipping unparseable span. key={} error={}", key, error)
                }
            }
        }

        spans.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at).then_with(|| a.0.cmp(&b.0)));
        Ok(spans)
    }

    /// Finds the span overlapping `[from, to]` the most, and which span
    /// covers each single height. Spans are scanned newest first and the
    /// first match wins.
    pub async fn check_overlap(
        &self,
        from_height: u64,
        to_height: u64,
        project_id: &str,
    ) -> Result<OverlapReport> {
        if from_height > to_height {
            return Err(DagError::InvalidRequest(format!(
                "from_height {} is above to_height {}",
                from_height, to_height
            )));
        }

        let mut report = OverlapReport::default();
        for (span_id, span) in self.live_spans(project_id).await? {
            let overlap = check_intersection(
                (from_height, to_height),
                (span.from_height, span.to_height),
            );
            if overlap > report.max_overlap {
                report.max_overlap = overlap;
                report.max_span_id = Some(span_id.clone());
            }

            for height in from_height..=to_height {
                if span.covers(height) {
                    report
                        .height_spans
                        .entry(height)
                        .or_insert_with(|| span_id.clone());
                }
            }
        }

        tracing::debug!(
            "Checked span overlap. project={} from={} to={} max_overlap={} covered={}",
            project_id,
            from_height,
            to_height,
            report.max_overlap,
            report.height_spans.len()
        );
        Ok(report)
    }

    /// Stores an assembled range under its derived id with the configured
    /// TTL. Saving the same range again refreshes it.
    pub async fn save_span(
        &self,
        from_height: u64,
        to_height: u64,
        project_id: &str,
        blocks: BTreeMap<u64, SpanBlock>,
    ) -> Result<String> {
        let span_id = span_id(from_height, to_height, project_id)?;
        let span = Span {
            from_height,
            to_height,
            created_at: chrono::Utc::now().timestamp_millis(),
            blocks,
        };

        let key = keys::live_span(project_id, &span_id);
        self.index.set(&key, &serde_json::to_string(&span)?).await?;
        self.index.expire(&key, self.expire_secs).await?;

        tracing::debug!(
            "Saved span. project={} from={} to={} span_id={} ttl_secs={}",
            project_id,
            from_height,
            to_height,
            span_id,
            self.expire_secs
        );
        Ok(span_id)
    }

    /// One height out of a live span. `None` once the span has expired or if
    /// it never held that height.
    pub async fn fetch_from_span(
        &self,
        project_id: &str,
        span_id: &str,
        height: u64,
    ) -> Result<Option<SpanBlock>> {
        Ok(self
            .load_span(project_id, span_id)
            .await?
            .and_then(|mut span| span.blocks.remove(&height)))
    }

    /// A whole live span, or `None` once it has expired.
    pub async fn load_span(&self, project_id: &str, span_id: &str) -> Result<Option<Span>> {
        match self.index.get(&keys::live_span(project_id, span_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
