//! SHARDCACHE - Typed Cache-Aside Layer over Sharded Key-Value Stores
//!
//! Entity caching with batched, shard-tagged fan-out, request coalescing,
//! score-ordered membership indexes and geospatial indexes. Runs against
//! Redis-compatible nodes over RESP or against an in-process store.

pub mod backend;
pub mod catalog;
pub mod client;
pub mod cluster;
pub mod coalesce;
pub mod codec;
pub mod compress;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod remote;
pub mod storage;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::{Backend, Coordinate, GeoMatch, GeoPoint, ScoreRange};
pub use client::{BatchGet, CacheKey, ShardedClient};
pub use codec::Codec;
pub use config::CacheConfig;
pub use error::{CacheError, CacheWriteWarning, Result};
pub use metrics::Metrics;
pub use remote::RemoteBackend;
pub use storage::{ConcurrentTtlCleaner, MemoryStore};
pub use store::{Cacheable, Cursor, EntityStore, Fetched, GeoStore, Lookup, Page, SliceStore};
