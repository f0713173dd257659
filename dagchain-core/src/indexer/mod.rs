//! Periodic sliding-window indexing.

mod supervisor;
mod window;

pub use supervisor::supervise;
pub use window::{CycleReport, IndexOutcome, SlidingWindowIndexer};

use tokio::sync::watch;

/// Runs the indexing loop under [`supervise`] until `shutdown` flips.
pub async fn run_supervised(indexer: SlidingWindowIndexer, shutdown: watch::Receiver<bool>) -> u64 {
    let restart_delay = indexer.config().restart_delay();
    supervise("sliding-window-indexer", restart_delay, shutdown, move || {
        indexer.clone().run_forever()
    })
    .await
}
