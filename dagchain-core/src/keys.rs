//! Index store key namespace.
//!
//! Every project-scoped key is prefixed with `projectID:{project_id}` so one
//! project's state can be inspected or dropped without touching another's.

pub const INDEXES_REQUESTED: &str = "cache:indexesRequested";

pub fn last_dag_cid(project_id: &str) -> String {
    format!("projectID:{}:lastDagCid", project_id)
}

pub fn dag_cids(project_id: &str) -> String {
    format!("projectID:{}:Cids", project_id)
}

pub fn block_height(project_id: &str) -> String {
    format!("projectID:{}:blockHeight", project_id)
}

pub fn pending_transactions(project_id: &str) -> String {
    format!("projectID:{}:pendingTransactions", project_id)
}

pub fn discarded_transactions(project_id: &str) -> String {
    format!("projectID:{}:discardedTransactions", project_id)
}

pub fn last_pruned_height(project_id: &str) -> String {
    format!("projectID:{}:lastPrunedHeight", project_id)
}

pub fn payload_commit(payload_commit_id: &str) -> String {
    format!("payloadCommit:{}", payload_commit_id)
}

pub fn live_span(project_id: &str, span_id: &str) -> String {
    format!("projectID:{}:liveSpans:{}", project_id, span_id)
}

pub fn live_spans_pattern(project_id: &str) -> String {
    live_span(project_id, "*")
}

pub fn containers(project_id: &str) -> String {
    format!("projectID:{}:containers", project_id)
}

pub fn container_data(container_id: &str) -> String {
    format!("containerData:{}", container_id)
}

pub fn cached_container(container_id: &str) -> String {
    format!("containerData:{}:cached", container_id)
}

pub fn sliding_window_head(project_id: &str, time_period: &str) -> String {
    format!("projectID:{}:slidingCache:{}:head", project_id, time_period)
}

pub fn sliding_window_tail(project_id: &str, time_period: &str) -> String {
    format!("projectID:{}:slidingCache:{}:tail", project_id, time_period)
}

/// Extracts the span id from a key produced by [`live_span`].
pub fn span_id_from_key(key: &str) -> &str {
    key.rsplit(':').next().unwrap_or(key)
}
