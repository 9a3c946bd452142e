//! Concurrent In-Memory Backend
//!
//! DashMap-backed implementation of [`Backend`] holding strings, sorted
//! sets and geo sets with per-key expiry. Used as the in-process backing
//! service and by the store tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use hashbrown::HashMap;

use super::geo;
use crate::backend::{Backend, Coordinate, GeoMatch, GeoPoint, ScoreRange};
use crate::error::{CacheError, Result};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Stored value kinds
#[derive(Debug, Clone)]
pub enum Value {
    Str(Bytes),
    SortedSet(HashMap<String, f64>),
    Geo(HashMap<String, Coordinate>),
}

/// Entry in the store with value and expiration
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<Instant>,
}

impl Entry {
    pub fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Instant::now() > t).unwrap_or(false)
    }
}

/// Lock-free concurrent in-memory backing service
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Entry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Create with a shard count scaled to the CPU count
    pub fn with_cpu_shards() -> Self {
        // DashMap requires a power of two
        let shards = (num_cpus::get() * 4).next_power_of_two().max(2);
        Self {
            inner: Arc::new(DashMap::with_shard_amount(shards)),
        }
    }

    /// Number of keys (including expired - approximate)
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Check if key exists and is not expired
    pub fn exists(&self, key: &str) -> bool {
        self.inner
            .get(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Remove expired keys, returns count of removed keys
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.inner.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// All live keys (for debugging/testing)
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .iter()
            .filter(|r| !r.is_expired())
            .map(|r| r.key().clone())
            .collect()
    }

    fn read_str(&self, key: &str) -> Result<Option<Bytes>> {
        match self.inner.get(key) {
            Some(entry) if !entry.is_expired() => match &entry.value {
                Value::Str(bytes) => Ok(Some(bytes.clone())),
                _ => Err(CacheError::Server(WRONGTYPE.to_string())),
            },
            _ => Ok(None),
        }
    }

    fn write_str(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        self.inner
            .insert(key.to_string(), Entry::new(Value::Str(value), ttl));
    }

    /// Mutate a sorted set, creating it when absent or expired
    fn with_sorted_set<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, f64>) -> T,
    ) -> Result<T> {
        let mut entry = self
            .inner
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::SortedSet(HashMap::new()), None));
        if entry.is_expired() {
            *entry = Entry::new(Value::SortedSet(HashMap::new()), None);
        }
        match &mut entry.value {
            Value::SortedSet(set) => Ok(f(set)),
            _ => Err(CacheError::Server(WRONGTYPE.to_string())),
        }
    }

    fn with_geo_set<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, Coordinate>) -> T,
    ) -> Result<T> {
        let mut entry = self
            .inner
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Geo(HashMap::new()), None));
        if entry.is_expired() {
            *entry = Entry::new(Value::Geo(HashMap::new()), None);
        }
        match &mut entry.value {
            Value::Geo(set) => Ok(f(set)),
            _ => Err(CacheError::Server(WRONGTYPE.to_string())),
        }
    }

    /// Drop a collection key once its last member is gone
    fn remove_if_empty(&self, key: &str) {
        self.inner.remove_if(key, |_, entry| match &entry.value {
            Value::SortedSet(set) => set.is_empty(),
            Value::Geo(set) => set.is_empty(),
            Value::Str(_) => false,
        });
    }
}

#[async_trait]
impl Backend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.read_str(key)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.write_str(key, value, ttl);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        // MGET answers nil for keys of another kind instead of failing
        Ok(keys
            .iter()
            .map(|key| self.read_str(key).ok().flatten())
            .collect())
    }

    async fn mset(&self, entries: Vec<(String, Bytes)>, ttl: Option<Duration>) -> Result<()> {
        for (key, value) in entries {
            self.write_str(&key, value, ttl);
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let removed = keys
            .iter()
            .filter(|key| {
                self.inner
                    .remove(key.as_str())
                    .map(|(_, entry)| !entry.is_expired())
                    .unwrap_or(false)
            })
            .count();
        Ok(removed as u64)
    }

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        if members.iter().any(|(score, _)| score.is_nan()) {
            return Err(CacheError::Server("ERR value is not a valid float".to_string()));
        }
        self.with_sorted_set(key, |set| {
            members
                .iter()
                .filter(|(score, member)| set.insert(member.clone(), *score).is_none())
                .count() as u64
        })
    }

    async fn zrevrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>> {
        let entry = match self.inner.get(key) {
            Some(entry) if !entry.is_expired() => entry,
            _ => return Ok(Vec::new()),
        };
        let Value::SortedSet(set) = &entry.value else {
            return Err(CacheError::Server(WRONGTYPE.to_string()));
        };

        let mut members: Vec<(String, f64)> = set
            .iter()
            .filter(|(_, score)| range.contains(**score))
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        // highest score first, ties in reverse lexicographic order
        members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        if let Some(limit) = limit {
            members.truncate(limit);
        }
        Ok(members)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64> {
        let removed = {
            let mut entry = match self.inner.get_mut(key) {
                Some(entry) if !entry.is_expired() => entry,
                _ => return Ok(0),
            };
            // geo sets are sorted sets on the server side, so ZREM applies to both
            match &mut entry.value {
                Value::SortedSet(set) => members.iter().filter(|m| set.remove(*m).is_some()).count(),
                Value::Geo(set) => members.iter().filter(|m| set.remove(*m).is_some()).count(),
                Value::Str(_) => return Err(CacheError::Server(WRONGTYPE.to_string())),
            }
        };
        self.remove_if_empty(key);
        Ok(removed as u64)
    }

    async fn zremrange_by_score(&self, key: &str, range: ScoreRange) -> Result<u64> {
        let removed = {
            let mut entry = match self.inner.get_mut(key) {
                Some(entry) if !entry.is_expired() => entry,
                _ => return Ok(0),
            };
            let Value::SortedSet(set) = &mut entry.value else {
                return Err(CacheError::Server(WRONGTYPE.to_string()));
            };
            let before = set.len();
            set.retain(|_, score| !range.contains(*score));
            before - set.len()
        };
        self.remove_if_empty(key);
        Ok(removed as u64)
    }

    async fn geoadd(&self, key: &str, points: &[GeoPoint]) -> Result<u64> {
        for point in points {
            geo::validate(point.coordinate)?;
        }
        self.with_geo_set(key, |set| {
            points
                .iter()
                .filter(|p| set.insert(p.member.clone(), p.coordinate).is_none())
                .count() as u64
        })
    }

    async fn georadius(&self, key: &str, center: Coordinate, radius_km: f64) -> Result<Vec<GeoMatch>> {
        geo::validate(center)?;
        if radius_km < 0.0 {
            return Err(CacheError::Server("ERR radius cannot be negative".to_string()));
        }
        let entry = match self.inner.get(key) {
            Some(entry) if !entry.is_expired() => entry,
            _ => return Ok(Vec::new()),
        };
        let Value::Geo(set) = &entry.value else {
            return Err(CacheError::Server(WRONGTYPE.to_string()));
        };

        let mut matches: Vec<GeoMatch> = set
            .iter()
            .map(|(member, coordinate)| GeoMatch {
                member: member.clone(),
                distance_km: geo::distance_km(center, *coordinate),
                coordinate: *coordinate,
            })
            .filter(|m| m.distance_km <= radius_km)
            .collect();
        matches.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(matches)
    }
}
