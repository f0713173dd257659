mod builder;
mod heights;

pub use builder::{CreateBlockRequest, CreatedBlock, DagChainBuilder, DiscardRequest};
pub use heights::HeightIndex;
