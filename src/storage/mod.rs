//! In-Process Backend
//!
//! Concurrent key-value store with TTL support, sorted sets and geo sets.

mod concurrent_store;
mod concurrent_ttl;
pub mod geo;

pub use concurrent_store::{Entry, MemoryStore, Value};
pub use concurrent_ttl::ConcurrentTtlCleaner;
