use super::{LedgerEntry, PendingTransactionLedger};
use crate::chain::{CreateBlockRequest, CreatedBlock, DagChainBuilder, DiscardRequest};
use crate::models::{FinalityCallback, FinalityEvent, LedgerState};
use crate::{DagError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Finality captured; the entry now waits for its block.
    Touched {
        project_id: String,
        tentative_height: u64,
        lost_race: bool,
    },
    /// No ledger entry matched the signal's transaction at its height.
    NoPendingEntry {
        project_id: String,
        tentative_height: u64,
    },
    AlreadyFinalized {
        project_id: String,
        height: u64,
    },
    Discarded {
        project_id: String,
        tentative_height: u64,
    },
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct FinalizeReport {
    pub built: Vec<CreatedBlock>,
    /// Height the run stopped at without building, if any.
    pub stopped_at: Option<u64>,
}

/// Applies inbound finality signals to the ledger and turns captured
/// finality into chain blocks.
#[derive(Clone)]
pub struct FinalizationReconciler {
    builder: DagChainBuilder,
    ledger: PendingTransactionLedger,
}

impl FinalizationReconciler {
    pub fn new(builder: DagChainBuilder, ledger: PendingTransactionLedger) -> Self {
        Self { builder, ledger }
    }

    pub async fn apply(&self, event: FinalityEvent) -> Result<ReconcileOutcome> {
        match event {
            FinalityEvent::RecordAppended(callback) => self.record_appended(callback).await,
            FinalityEvent::RecordDiscarded(callback) => self.record_discarded(callback).await,
            FinalityEvent::Unrecognized => {
                tracing::info!("Ignoring unrecognized finality event");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    async fn record_appended(&self, callback: FinalityCallback) -> Result<ReconcileOutcome> {
        let project_id = callback.event_data.project_id.clone();
        let tentative_height = callback.event_data.tentative_block_height;

        let Some(entry) = self
            .ledger
            .find(&project_id, tentative_height, &callback.tx_hash)
            .await?
        else {
            tracing::warn!(
                "No pending entry for finality event. project={} height={} tx_hash={}",
                project_id,
                tentative_height,
                callback.tx_hash
            );
            return Ok(ReconcileOutcome::NoPendingEntry {
                project_id,
                tentative_height,
            });
        };

        if let LedgerState::Finalized(height) = entry.entry.state() {
            tracing::info!(
                "Finality event for already finalized entry. project={} height={} tx_hash={}",
                project_id,
                height,
                callback.tx_hash
            );
            return Ok(ReconcileOutcome::AlreadyFinalized { project_id, height });
        }

        let touched = self.ledger.save_event_data(&callback, &entry.raw).await?;
        Ok(ReconcileOutcome::Touched {
            project_id,
            tentative_height,
            lost_race: !touched.removed,
        })
    }

    async fn record_discarded(&self, callback: FinalityCallback) -> Result<ReconcileOutcome> {
        let data = callback.event_data;
        self.builder
            .discard_event(DiscardRequest {
                project_id: data.project_id.clone(),
                payload_commit_id: data.payload_commit_id,
                payload_cid: data.snapshot_cid,
                tx_hash: callback.tx_hash,
                tentative_height: data.tentative_block_height,
            })
            .await?;

        Ok(ReconcileOutcome::Discarded {
            project_id: data.project_id,
            tentative_height: data.tentative_block_height,
        })
    }

    /// Builds blocks for consecutive touched entries above the current max
    /// height. Stops at the first height that is not ready, or when a block
    /// cannot be stored; that entry stays touched for a later run.
    pub async fn finalize_ready(&self, project_id: &str) -> Result<FinalizeReport> {
        let heights = self.builder.heights();
        let max_height = heights.max_height(project_id).await?.unwrap_or(0);
        if let Some(top) = heights.top_indexed_height(project_id).await? {
            if top > max_height {
                tracing::error!(
                    "Height pointers lag indexed blocks. project={} max_height={} top_indexed={}",
                    project_id,
                    max_height,
                    top
                );
                return Err(DagError::IndexInconsistency(format!(
                    "max height {} is behind indexed height {}. project={}",
                    max_height, top, project_id
                )));
            }
        }

        let mut report = FinalizeReport::default();
        let mut next = max_height + 1;

        loop {
            let entries = self.ledger.entries_at(project_id, next).await?;
            let Some(entry) = entries
                .into_iter()
                .find(|candidate| candidate.entry.state() == LedgerState::Touched)
            else {
                report.stopped_at = Some(next);
                break;
            };

            match self.build_entry(project_id, next, &entry).await {
                Ok(created) => report.built.push(created),
                Err(DagError::StorageWriteFailure(reason)) => {
                    tracing::warn!(
                        "Block build deferred. project={} height={} reason={}",
                        project_id,
                        next,
                        reason
                    );
                    report.stopped_at = Some(next);
                    break;
                }
                Err(error) => return Err(error),
            }
            next += 1;
        }

        if !report.built.is_empty() {
            tracing::info!(
                "Finalized pending entries. project={} built={} stopped_at={:?}",
                project_id,
                report.built.len(),
                report.stopped_at
            );
        }
        Ok(report)
    }

    async fn build_entry(
        &self,
        project_id: &str,
        height: u64,
        entry: &LedgerEntry,
    ) -> Result<CreatedBlock> {
        let event_data = entry.entry.event_data.clone().ok_or_else(|| {
            DagError::IndexInconsistency(format!(
                "touched entry has no event data. project={} height={}",
                project_id, height
            ))
        })?;

        let created = self
            .builder
            .create_block(CreateBlockRequest {
                tx_hash: entry.entry.tx_hash.clone(),
                project_id: project_id.to_string(),
                tentative_height: height,
                payload_cid: event_data.snapshot_cid.clone(),
                timestamp: event_data.timestamp,
            })
            .await?;

        self.ledger
            .touch(&entry.raw, height as i64, project_id, height, None)
            .await?;
        self.ledger
            .clear_payload_commit_data(project_id, &event_data.payload_commit_id, height)
            .await?;

        Ok(created)
    }
}
