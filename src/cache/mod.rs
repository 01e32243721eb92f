//! Cache tiers owned by the resolver: the bounded in-memory table and the
//! on-disk daily store.

pub mod memory;
pub mod store;

pub use memory::MemoryCache;
pub use store::{DailyCacheStore, PruneReport};
