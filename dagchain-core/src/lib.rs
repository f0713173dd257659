//! Dagchain Core - append-only audit chains per project
//!
//! Builds content-addressed chain blocks from finalized transactions and
//! serves historical ranges as the chain grows and is compacted:
//! - pending-transaction ledger reconciled against finality signals
//! - range retrieval through a TTL-bound span cache
//! - bloom-filter addressed containers for pruned history
//! - periodic sliding-time-window markers

pub mod bloom;
pub mod chain;
pub mod config;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod ledger;
pub mod models;
pub mod retrieval;
pub mod storage;

pub use bloom::{BloomFilter, BloomFilterSettings};
pub use chain::{CreateBlockRequest, CreatedBlock, DagChainBuilder, DiscardRequest, HeightIndex};
pub use config::{CoreConfig, IndexerConfig};
pub use error::{DagError, Result};
pub use indexer::{CycleReport, IndexOutcome, SlidingWindowIndexer, run_supervised, supervise};
pub use ledger::{
    FinalizationReconciler, FinalizeReport, LedgerEntry, PendingTransactionLedger,
    ReconcileOutcome,
};
pub use models::{
    DagBlock, EventData, FinalityCallback, FinalityEvent, LedgerState, PendingTransaction,
    SlidingWindowMarker, TimePeriod,
};
pub use retrieval::{
    ContainerIndex, ContainerPlan, ContainerRecord, FetchedBlocks, OverlapReport,
    RetrievalEngine, RetrievalPlan, SpanCache,
};
pub use storage::{
    ContentClient, ContentStore, ContentStoreBuilder, IndexStore, IndexStoreBuilder,
    MemoryContentStore, MemoryIndexStore,
};
