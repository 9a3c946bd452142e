//! Typed Stores
//!
//! The entity store caches values by key; the slice and geo stores keep
//! ordered-set and geospatial indexes whose members resolve through an
//! entity store.

mod entity;
mod geo;
mod slice;

pub use entity::{EntityStore, Fetched, Lookup};
pub use geo::GeoStore;
pub use slice::{Cursor, Page, SliceStore};

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::Coordinate;
use crate::error::{CacheError, Result};

/// Extracts the entity key
pub type KeyFn<K, V> = Arc<dyn Fn(&V) -> K + Send + Sync>;

/// Extracts the ordered-set score
pub type ScoreFn<V> = Arc<dyn Fn(&V) -> f64 + Send + Sync>;

/// Extracts the geo position
pub type LocationFn<V> = Arc<dyn Fn(&V) -> Coordinate + Send + Sync>;

/// Payload storage consumed by the index stores
#[async_trait]
pub trait Cacheable<K, V>: Send + Sync {
    async fn set(&self, values: &[V]) -> Result<()>;

    /// Cache-only read, one slot per requested key
    async fn get(&self, keys: &[K]) -> Result<Vec<Option<V>>>;
}

fn accessor<'a, T: ?Sized>(slot: &'a Option<Arc<T>>, what: &'static str) -> Result<&'a T> {
    slot.as_deref().ok_or(CacheError::Configuration(what))
}
