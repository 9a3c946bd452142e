//! Cluster Module
//!
//! Slot hashing and the static slot-to-node table used for routing.

pub mod sharding;

pub use sharding::{hashtag, ShardMap, Slot, SlotRange, TOTAL_SLOTS};
