use super::HeightIndex;
use crate::ledger::PendingTransactionLedger;
use crate::models::{DagBlock, HOT_PAYLOAD, PayloadRef};
use crate::storage::{ContentClient, IndexStore};
use crate::{DagError, Result, keys};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CreateBlockRequest {
    pub tx_hash: String,
    pub project_id: String,
    pub tentative_height: u64,
    pub payload_cid: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedBlock {
    pub cid: String,
    pub block: DagBlock,
}

#[derive(Debug, Clone)]
pub struct DiscardRequest {
    pub project_id: String,
    pub payload_commit_id: String,
    pub payload_cid: String,
    pub tx_hash: String,
    pub tentative_height: u64,
}

/// Appends blocks to a project's chain and advances its height pointers.
#[derive(Clone)]
pub struct DagChainBuilder {
    index: Arc<dyn IndexStore>,
    content: ContentClient,
    ledger: PendingTransactionLedger,
    heights: HeightIndex,
}

impl DagChainBuilder {
    pub fn new(index: Arc<dyn IndexStore>, content: ContentClient) -> Self {
        Self {
            ledger: PendingTransactionLedger::new(index.clone()),
            heights: HeightIndex::new(index.clone()),
            index,
            content,
        }
    }

    pub fn heights(&self) -> &HeightIndex {
        &self.heights
    }

    /// Persists the block at `tentative_height` and then updates the latest
    /// cid, the height->cid set and the max height as three separate writes.
    ///
    /// A crash between those writes leaves the pointers behind the stored
    /// block; nothing here repairs that.
    pub async fn create_block(&self, request: CreateBlockRequest) -> Result<CreatedBlock> {
        let CreateBlockRequest {
            tx_hash,
            project_id,
            tentative_height,
            payload_cid,
            timestamp,
        } = request;

        if tentative_height == 0 {
            return Err(DagError::InvalidRequest(
                "block height starts at 1".to_string(),
            ));
        }

        let prev_cid = if tentative_height == 1 {
            None
        } else {
            let prev = self
                .heights
                .dag_cid(&project_id, tentative_height - 1)
                .await?;
            if prev.is_none() {
                return Err(DagError::IndexInconsistency(format!(
                    "no block indexed below new height. project={} height={}",
                    project_id, tentative_height
                )));
            }
            prev
        };

        let block = DagBlock {
            height: tentative_height,
            prev_cid,
            payload: PayloadRef {
                cid: payload_cid,
                kind: HOT_PAYLOAD.to_string(),
            },
            tx_hash,
            timestamp,
        };

        let cid = self.content.put_block(&block).await.inspect_err(|error| {
            tracing::error!(
                "Failed to store block. project={} height={} error={}",
                project_id,
                tentative_height,
                error
            );
        })?;

        let score = tentative_height as i64;
        self.index
            .set(&keys::last_dag_cid(&project_id), &cid)
            .await?;
        self.index
            .zadd(&keys::dag_cids(&project_id), &cid, score)
            .await?;
        self.index
            .set(&keys::block_height(&project_id), &tentative_height.to_string())
            .await?;

        tracing::info!(
            "Created block. project={} height={} cid={}",
            project_id,
            tentative_height,
            cid
        );

        Ok(CreatedBlock { cid, block })
    }

    /// Gives up on a tentative height: clears its ledger entry and commit
    /// data and records the transaction in the discarded set.
    pub async fn discard_event(&self, request: DiscardRequest) -> Result<()> {
        let DiscardRequest {
            project_id,
            payload_commit_id,
            payload_cid,
            tx_hash,
            tentative_height,
        } = request;

        let cleared = self
            .ledger
            .clear_payload_commit_data(&project_id, &payload_commit_id, tentative_height)
            .await?;
        self.index
            .zadd(
                &keys::discarded_transactions(&project_id),
                &tx_hash,
                tentative_height as i64,
            )
            .await?;

        tracing::warn!(
            "Discarded transaction. project={} height={} tx_hash={} payload_cid={} entries_removed={}",
            project_id,
            tentative_height,
            tx_hash,
            payload_cid,
            cleared.entries_removed
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryContentStore, MemoryIndexStore};
    use std::time::Duration;

    struct Fixture {
        index: Arc<MemoryIndexStore>,
        content: Arc<MemoryContentStore>,
        builder: DagChainBuilder,
    }

    fn fixture() -> Fixture {
        let index = Arc::new(MemoryIndexStore::new());
        let content = Arc::new(MemoryContentStore::new());
        let builder = DagChainBuilder::new(
            index.clone(),
            ContentClient::new(content.clone(), Duration::from_secs(1)),
        );
        Fixture {
            index,
            content,
            builder,
        }
    }

    fn request(height: u64) -> CreateBlockRequest {
        CreateBlockRequest {
            tx_hash: format!("0x{}", height),
            project_id: "proj".to_string(),
            tentative_height: height,
            payload_cid: format!("payload-{}", height),
            timestamp: 1700000000 + height as i64 * 60,
        }
    }

    #[tokio::test]
    async fn test_prev_cid_chain_links_every_height() {
        let fixture = fixture();
        let mut cids = Vec::new();
        for height in 1..=6 {
            cids.push(fixture.builder.create_block(request(height)).await.unwrap().cid);
        }

        let client = ContentClient::new(fixture.content.clone(), Duration::from_secs(1));
        for (high, low) in [(6u64, 1u64), (5, 3), (4, 4)] {
            let mut cid = cids[high as usize - 1].clone();
            for _ in 0..(high - low) {
                let block = client.get_block(&cid).await.unwrap();
                cid = block.prev_cid.unwrap();
            }
            assert_eq!(cid, cids[low as usize - 1]);
        }

        let first = client.get_block(&cids[0]).await.unwrap();
        assert_eq!(first.prev_cid, None);
        assert_eq!(first.payload.kind, HOT_PAYLOAD);
    }

    #[tokio::test]
    async fn test_create_block_advances_pointers() {
        let fixture = fixture();
        fixture.builder.create_block(request(1)).await.unwrap();
        let second = fixture.builder.create_block(request(2)).await.unwrap();

        let heights = fixture.builder.heights();
        assert_eq!(heights.max_height("proj").await.unwrap(), Some(2));
        assert_eq!(heights.last_dag_cid("proj").await.unwrap(), Some(second.cid.clone()));
        assert_eq!(heights.dag_cid("proj", 2).await.unwrap(), Some(second.cid));
        assert!(fixture.content.is_pinned(&heights.dag_cid("proj", 1).await.unwrap().unwrap()));
    }

    #[tokio::test]
    async fn test_store_failure_leaves_pointers_untouched() {
        let fixture = fixture();
        fixture.builder.create_block(request(1)).await.unwrap();
        fixture.content.set_reject_writes(true);

        let result = fixture.builder.create_block(request(2)).await;
        assert!(matches!(result, Err(DagError::StorageWriteFailure(_))));
        assert_eq!(fixture.builder.heights().max_height("proj").await.unwrap(), Some(1));
        assert_eq!(fixture.builder.heights().dag_cid("proj", 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_predecessor_is_inconsistency() {
        let fixture = fixture();
        assert!(matches!(
            fixture.builder.create_block(request(3)).await,
            Err(DagError::IndexInconsistency(_))
        ));
        assert!(matches!(
            fixture.builder.create_block(request(0)).await,
            Err(DagError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_discard_event_frees_height() {
        let fixture = fixture();
        let ledger = PendingTransactionLedger::new(fixture.index.clone());
        ledger.add_pending("proj", 5, "0xdead").await.unwrap();
        fixture
            .index
            .set(&keys::payload_commit("commit-5"), "{}")
            .await
            .unwrap();

        fixture
            .builder
            .discard_event(DiscardRequest {
                project_id: "proj".to_string(),
                payload_commit_id: "commit-5".to_string(),
                payload_cid: "payload-5".to_string(),
                tx_hash: "0xdead".to_string(),
                tentative_height: 5,
            })
            .await
            .unwrap();

        assert!(ledger.entries_at("proj", 5).await.unwrap().is_empty());
        assert_eq!(
            ledger.discarded("proj").await.unwrap(),
            vec![("0xdead".to_string(), 5)]
        );
        assert!(
            !fixture
                .index
                .exists(&keys::payload_commit("commit-5"))
                .await
                .unwrap()
        );
    }
}
