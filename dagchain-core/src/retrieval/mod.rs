//! Range retrieval over a project's chain.

mod container_index;
mod engine;
mod span_cache;

pub use container_index::{ContainerIndex, ContainerPlan, ContainerRecord, RequiredContainer};
pub use engine::{FetchedBlocks, RetrievalEngine, RetrievalPlan};
pub use span_cache::{OverlapReport, Span, SpanBlock, SpanCache, check_intersection, span_id};
