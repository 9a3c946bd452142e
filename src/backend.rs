//! Backing Service Interface
//!
//! The primitives the caching core needs from a key-value service: multi-key
//! strings with expiry, sorted sets and geo sets. Implemented in-process by
//! [`crate::storage::MemoryStore`] and over RESP by
//! [`crate::remote::RemoteBackend`].

use std::fmt;
use std::ops::Bound;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Score interval for sorted-set range commands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: Bound<f64>,
    pub max: Bound<f64>,
}

impl ScoreRange {
    /// `-inf` to `+inf`
    pub fn all() -> Self {
        Self {
            min: Bound::Unbounded,
            max: Bound::Unbounded,
        }
    }

    /// Scores strictly below `max`
    pub fn below(max: f64) -> Self {
        Self {
            min: Bound::Unbounded,
            max: Bound::Excluded(max),
        }
    }

    /// Scores up to and including `max`
    pub fn at_most(max: f64) -> Self {
        Self {
            min: Bound::Unbounded,
            max: Bound::Included(max),
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        let above_min = match self.min {
            Bound::Unbounded => true,
            Bound::Included(min) => score >= min,
            Bound::Excluded(min) => score > min,
        };
        let below_max = match self.max {
            Bound::Unbounded => true,
            Bound::Included(max) => score <= max,
            Bound::Excluded(max) => score < max,
        };
        above_min && below_max
    }
}

/// Latitude / longitude in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// A member to place in a geo set
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPoint {
    pub member: String,
    pub coordinate: Coordinate,
}

/// A member returned by a radius query
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    pub member: String,
    pub distance_km: f64,
    pub coordinate: Coordinate,
}

/// Key-value service primitives
///
/// Missing keys are never errors: `get`/`mget` yield `None`, range and radius
/// queries on an absent collection yield an empty list.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// `None` means no expiry
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// One slot per requested key, in request order
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    /// Pipelined writes sharing one expiry
    async fn mset(&self, entries: Vec<(String, Bytes)>, ttl: Option<Duration>) -> Result<()>;

    /// Returns the number of keys removed
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Returns the number of members newly added
    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64>;

    /// Members within `range`, highest score first, with their scores
    async fn zrevrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>>;

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64>;

    async fn zremrange_by_score(&self, key: &str, range: ScoreRange) -> Result<u64>;

    async fn geoadd(&self, key: &str, points: &[GeoPoint]) -> Result<u64>;

    /// Members within `radius_km` of `center`, nearest first
    async fn georadius(&self, key: &str, center: Coordinate, radius_km: f64) -> Result<Vec<GeoMatch>>;
}
