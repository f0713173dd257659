use crate::models::{EventData, FinalityCallback, PendingTransaction, TOUCHED_MARKER};
use crate::storage::IndexStore;
use crate::{DagError, Result, keys};
use std::sync::Arc;

/// A ledger entry together with the exact bytes it is stored under.
///
/// Removal is by value, so `raw` must be passed back unchanged to
/// [`PendingTransactionLedger::touch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub raw: String,
    pub entry: PendingTransaction,
    pub tentative_height: u64,
}

#[derive(Debug, Clone)]
pub struct TouchResult {
    /// False when the old entry was already gone; a concurrent touch may have
    /// lost its update.
    pub removed: bool,
    pub inserted: bool,
    pub entry: PendingTransaction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearResult {
    pub entries_removed: u64,
    pub commit_keys_deleted: u64,
}

/// Per-project sorted set of in-flight transactions, scored by tentative
/// block height.
#[derive(Clone)]
pub struct PendingTransactionLedger {
    index: Arc<dyn IndexStore>,
}

impl PendingTransactionLedger {
    pub fn new(index: Arc<dyn IndexStore>) -> Self {
        Self { index }
    }

    /// Records a freshly committed payload at its tentative height.
    pub async fn add_pending(
        &self,
        project_id: &str,
        tentative_height: u64,
        tx_hash: &str,
    ) -> Result<PendingTransaction> {
        let existing = self.entries_at(project_id, tentative_height).await?;
        if !existing.is_empty() {
            return Err(DagError::InvalidRequest(format!(
                "pending entry already exists. project={} height={}",
                project_id, tentative_height
            )));
        }

        let entry = PendingTransaction::new(tx_hash);
        self.index
            .zadd(
                &keys::pending_transactions(project_id),
                &entry.to_json()?,
                tentative_height as i64,
            )
            .await?;

        tracing::debug!(
            "Added pending entry. project={} height={} tx_hash={}",
            project_id,
            tentative_height,
            tx_hash
        );
        Ok(entry)
    }

    pub async fn entries_at(&self, project_id: &str, tentative_height: u64) -> Result<Vec<LedgerEntry>> {
        self.entries_between(project_id, tentative_height, tentative_height)
            .await
    }

    pub async fn pending(&self, project_id: &str) -> Result<Vec<LedgerEntry>> {
        self.entries_between(project_id, 0, i64::MAX as u64).await
    }

    /// Entry at `tentative_height` carrying `tx_hash`.
    pub async fn find(
        &self,
        project_id: &str,
        tentative_height: u64,
        tx_hash: &str,
    ) -> Result<Option<LedgerEntry>> {
        let entries = self.entries_at(project_id, tentative_height).await?;
        Ok(entries
            .into_iter()
            .find(|candidate| candidate.entry.tx_hash == tx_hash))
    }

    async fn entries_between(
        &self,
        project_id: &str,
        min_height: u64,
        max_height: u64,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = self
            .index
            .zrangebyscore_withscores(
                &keys::pending_transactions(project_id),
                min_height as i64,
                max_height as i64,
            )
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (raw, score) in rows {
            match PendingTransaction::from_json(&raw) {
                Ok(entry) => entries.push(LedgerEntry {
                    raw,
                    entry,
                    tentative_height: score.max(0) as u64,
                }),
                Err(error) => tracing::error!(
                    "Skipping unparseable pending entry. project={} height={} error={}",
                    project_id,
                    score,
                    error
                ),
            }
        }

        Ok(entries)
    }

    /// Replaces an entry with an updated copy at the same score.
    ///
    /// Remove and insert are two separate store calls. Two callers touching
    /// the same logical entry can interleave and one update is lost; a
    /// missing old entry is logged, not treated as failure.
    pub async fn touch(
        &self,
        serialized_old_entry: &str,
        new_touched_height: i64,
        project_id: &str,
        tentative_height: u64,
        event_data: Option<EventData>,
    ) -> Result<TouchResult> {
        let mut entry = PendingTransaction::from_json(serialized_old_entry).map_err(|error| {
            DagError::InvalidRequest(format!("unparseable pending entry: {}", error))
        })?;

        let key = keys::pending_transactions(project_id);
        let removed = self.index.zrem(&key, serialized_old_entry).await? > 0;
        if !removed {
            tracing::warn!(
                "pending entry was already gone before touch. project={} height={} tx_hash={}",
                project_id,
                tentative_height,
                entry.tx_hash
            );
        }

        entry.last_touched_block = new_touched_height;
        if let Some(event_data) = event_data {
            entry.event_data = Some(event_data);
        }

        let inserted = self
            .index
            .zadd(&key, &entry.to_json()?, tentative_height as i64)
            .await?
            > 0;

        tracing::debug!(
            "Touched pending entry. project={} height={} last_touched_block={} removed={} inserted={}",
            project_id,
            tentative_height,
            new_touched_height,
            removed,
            inserted
        );

        Ok(TouchResult {
            removed,
            inserted,
            entry,
        })
    }

    /// Captures a finality signal against its ledger entry without building
    /// the chain block.
    pub async fn save_event_data(
        &self,
        callback: &FinalityCallback,
        serialized_old_entry: &str,
    ) -> Result<TouchResult> {
        let event_data = callback.to_event_data();
        let project_id = event_data.project_id.clone();
        let tentative_height = event_data.tentative_block_height;

        self.touch(
            serialized_old_entry,
            TOUCHED_MARKER,
            &project_id,
            tentative_height,
            Some(event_data),
        )
        .await
    }

    /// Drops the transient state of a payload commit once its height is
    /// settled, either built or discarded.
    pub async fn clear_payload_commit_data(
        &self,
        project_id: &str,
        payload_commit_id: &str,
        tentative_height: u64,
    ) -> Result<ClearResult> {
        let score = tentative_height as i64;
        let entries_removed = self
            .index
            .zremrangebyscore(&keys::pending_transactions(project_id), score, score)
            .await?;
        let commit_keys_deleted = self
            .index
            .delete(&keys::payload_commit(payload_commit_id))
            .await?;

        Ok(ClearResult {
            entries_removed,
            commit_keys_deleted,
        })
    }

    /// Discarded transaction hashes with the height they were freed from.
    pub async fn discarded(&self, project_id: &str) -> Result<Vec<(String, u64)>> {
        let rows = self
            .index
            .zrangebyscore_withscores(&keys::discarded_transactions(project_id), 0, i64::MAX)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(tx_hash, score)| (tx_hash, score.max(0) as u64))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FinalityCallbackData, LedgerState};
    use crate::storage::MemoryIndexStore;

    fn ledger() -> PendingTransactionLedger {
        PendingTransactionLedger::new(Arc::new(MemoryIndexStore::new()))
    }

    fn callback(tx_hash: &str, height: u64) -> FinalityCallback {
        FinalityCallback {
            tx_hash: tx_hash.to_string(),
            request_id: "req".to_string(),
            event_data: FinalityCallbackData {
                api_key_hash: "0xkey".to_string(),
                tentative_block_height: height,
                project_id: "proj".to_string(),
                snapshot_cid: "snap".to_string(),
                payload_commit_id: "commit".to_string(),
                timestamp: 1700000000,
            },
        }
    }

    #[tokio::test]
    async fn test_touch_preserves_score() {
        let ledger = ledger();
        ledger.add_pending("proj", 4, "0xa").await.unwrap();
        let before = ledger.entries_at("proj", 4).await.unwrap().remove(0);

        let result = ledger
            .save_event_data(&callback("0xa", 4), &before.raw)
            .await
            .unwrap();
        assert!(result.removed);
        assert!(result.inserted);

        let after = ledger.entries_at("proj", 4).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].tentative_height, 4);
        assert_eq!(after[0].entry.state(), LedgerState::Touched);
        assert_eq!(after[0].entry.request_id, before.entry.request_id);
        assert_eq!(
            after[0].entry.event_data.as_ref().unwrap().snapshot_cid,
            "snap"
        );
    }

    #[tokio::test]
    async fn test_touch_tolerates_missing_entry() {
        let ledger = ledger();
        ledger.add_pending("proj", 1, "0xa").await.unwrap();
        let stale = ledger.entries_at("proj", 1).await.unwrap().remove(0);

        ledger.touch(&stale.raw, -1, "proj", 1, None).await.unwrap();
        // Second caller still holds the pre-touch bytes.
        let raced = ledger.touch(&stale.raw, 5, "proj", 1, None).await.unwrap();
        assert!(!raced.removed);

        // Both copies survive at the same score: the documented lost update.
        let entries = ledger.entries_at("proj", 1).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_add_pending_rejects_occupied_height() {
        let ledger = ledger();
        ledger.add_pending("proj", 2, "0xa").await.unwrap();
        assert!(matches!(
            ledger.add_pending("proj", 2, "0xb").await,
            Err(DagError::InvalidRequest(_))
        ));
        assert!(ledger.find("proj", 2, "0xa").await.unwrap().is_some());
        assert!(ledger.find("proj", 2, "0xb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_payload_commit_data() {
        let store = Arc::new(MemoryIndexStore::new());
        let ledger = PendingTransactionLedger::new(store.clone());
        ledger.add_pending("proj", 3, "0xa").await.unwrap();
        ledger.add_pending("proj", 4, "0xb").await.unwrap();
        store
            .set(&keys::payload_commit("commit-3"), "{}")
            .await
            .unwrap();

        let cleared = ledger
            .clear_payload_commit_data("proj", "commit-3", 3)
            .await
            .unwrap();
        assert_eq!(
            cleared,
            ClearResult {
                entries_removed: 1,
                commit_keys_deleted: 1
            }
        );
        let remaining = ledger.pending("proj").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tentative_height, 4);
    }
}
