//! Storage clients for Dagchain
//!
//! Provides the index store (heights, pointers, caches) and the
//! content-addressed store (blocks, payloads).

pub mod content_store;
pub mod factory;
pub mod index_store;

pub use content_store::{
    ContentClient, ContentStore, IpfsContentStore, MemoryContentStore, compute_cid,
};
pub use factory::{ContentStoreBuilder, IndexStoreBuilder};
pub use index_store::{IndexStore, MemoryIndexStore, RedisIndexStore};
