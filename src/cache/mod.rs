//! In-memory store for decoded media.
//!
//! - `CacheStore` - byte-budgeted LRU keyed by normalized path
//! - `ReleaseHook` - per-kind teardown run when an entry leaves the store

pub mod store;

pub use store::{CacheStats, CacheStore, ReleaseHook};
