//! Sharded Client
//!
//! Turns logical `(namespace, id)` keys into tagged physical keys, groups
//! them by shard tag and runs one batched command per group concurrently.
//! The first failing group aborts the others.

mod keys;

pub use keys::{KeySpace, Tagged, TaggedKey};

use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::task::JoinSet;
use tracing::debug;

use crate::backend::{Backend, Coordinate, GeoMatch, GeoPoint, ScoreRange};
use crate::compress;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::metrics::Metrics;
use crate::remote::RemoteBackend;
use crate::storage::MemoryStore;

/// Requirements on logical entity keys.
///
/// Keys are rendered with `Display` into physical keys and index members,
/// and parsed back from index members.
pub trait CacheKey: Clone + Ord + Hash + Display + Debug + Send + Sync + 'static {
    fn parse_member(member: &str) -> Option<Self>;
}

impl<T> CacheKey for T
where
    T: Clone + Ord + Hash + Display + Debug + Send + Sync + 'static + std::str::FromStr,
{
    fn parse_member(member: &str) -> Option<Self> {
        member.parse().ok()
    }
}

/// Result of a batched read: present values with their ids, and the ids
/// the backing service did not have.
#[derive(Debug, Clone)]
pub struct BatchGet<K> {
    pub values: Vec<(K, Bytes)>,
    pub missing: Vec<K>,
}

impl<K> Default for BatchGet<K> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            missing: Vec::new(),
        }
    }
}

/// Client over a backing service for keys of type `K`
pub struct ShardedClient<K> {
    backend: Arc<dyn Backend>,
    keys: KeySpace,
    compression: bool,
    enabled: bool,
    metrics: Arc<Metrics>,
    _key: PhantomData<fn() -> K>,
}

impl<K> Clone for ShardedClient<K> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            keys: self.keys.clone(),
            compression: self.compression,
            enabled: self.enabled,
            metrics: self.metrics.clone(),
            _key: PhantomData,
        }
    }
}

impl<K> fmt::Debug for ShardedClient<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedClient")
            .field("backend", &self.backend)
            .field("keys", &self.keys)
            .field("compression", &self.compression)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<K> ShardedClient<K> {
    pub fn new(config: &CacheConfig, backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            keys: KeySpace::new(config.key_prefix.clone(), config.hashtag_position),
            compression: config.compression,
            enabled: config.enabled,
            metrics: Arc::new(Metrics::new()),
            _key: PhantomData,
        }
    }

    /// Client talking RESP to the configured endpoints
    pub fn remote(config: &CacheConfig) -> Result<Self> {
        let backend = RemoteBackend::new(config.addresses(), config.command_timeout())?;
        Ok(Self::new(config, Arc::new(backend)))
    }

    /// Client over a fresh in-process store
    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()))
    }

    /// Same backend, metrics and key layout for another key type
    pub fn rekey<K2>(&self) -> ShardedClient<K2> {
        ShardedClient {
            backend: self.backend.clone(),
            keys: self.keys.clone(),
            compression: self.compression,
            enabled: self.enabled,
            metrics: self.metrics.clone(),
            _key: PhantomData,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn make_key(&self, namespace: &str, id: &impl Display) -> String {
        self.keys.make_key(namespace, id)
    }

    pub fn tag(&self, namespace: &str, id: &impl Display) -> TaggedKey {
        self.keys.tag(namespace, id)
    }

    async fn timed<T>(&self, command: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let start = Instant::now();
        let result = fut.await;
        self.metrics.record_operation(command, start.elapsed());
        result
    }

    fn decode_payload(&self, raw: Bytes) -> Result<Bytes> {
        if self.compression {
            compress::decompress(&raw)
        } else {
            Ok(raw)
        }
    }

    fn encode_payload(&self, raw: Bytes) -> Result<Bytes> {
        if self.compression {
            compress::compress(&raw)
        } else {
            Ok(raw)
        }
    }
}

/// Run one task per partition; the first error aborts the rest.
async fn fan_out<T, Fut>(command: &'static str, tasks: impl IntoIterator<Item = Fut>) -> Result<Vec<T>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for task in tasks {
        set.spawn(task);
    }

    let mut results = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        let err = match joined {
            Ok(Ok(value)) => {
                results.push(value);
                continue;
            }
            Ok(Err(err)) => err,
            Err(join_err) => CacheError::Task(join_err.to_string()),
        };
        debug!(command, error = %err, remaining = set.len(), "partition failed, aborting siblings");
        set.abort_all();
        return Err(err);
    }
    Ok(results)
}

fn expiry(ttl: Duration) -> Option<Duration> {
    if ttl.is_zero() {
        None
    } else {
        Some(ttl)
    }
}

impl<K: CacheKey> ShardedClient<K> {
    /// Read many ids; absent ids are reported in `missing`, not as errors.
    pub async fn batch_get(&self, namespace: &str, ids: &[K]) -> Result<BatchGet<K>> {
        if ids.is_empty() {
            return Ok(BatchGet::default());
        }
        if !self.enabled {
            return Ok(BatchGet {
                values: Vec::new(),
                missing: ids.to_vec(),
            });
        }

        let groups = self.keys.partition(namespace, ids.iter().map(|id| (id.clone(), ())));
        let tasks = groups.into_values().map(|group| {
            let backend = self.backend.clone();
            let compression = self.compression;
            async move {
                let keys: Vec<String> = group.iter().map(|t| t.key.clone()).collect();
                let replies = backend.mget(&keys).await?;
                if replies.len() != keys.len() {
                    return Err(CacheError::Protocol(format!(
                        "MGET returned {} values for {} keys",
                        replies.len(),
                        keys.len()
                    )));
                }

                let mut partial = BatchGet::default();
                for (tagged, reply) in group.into_iter().zip(replies) {
                    match reply {
                        Some(raw) => {
                            let value = if compression { compress::decompress(&raw)? } else { raw };
                            partial.values.push((tagged.id, value));
                        }
                        None => partial.missing.push(tagged.id),
                    }
                }
                Ok(partial)
            }
        });

        let partials = self.timed("MGET", fan_out("MGET", tasks)).await?;
        let mut merged = BatchGet::default();
        for partial in partials {
            merged.values.extend(partial.values);
            merged.missing.extend(partial.missing);
        }
        Ok(merged)
    }

    /// Write many values; `ttl` of zero means no expiry.
    pub async fn batch_set(&self, namespace: &str, ttl: Duration, entries: Vec<(K, Bytes)>) -> Result<()> {
        if entries.is_empty() || !self.enabled {
            return Ok(());
        }

        // compress everything up front so a failure writes nothing
        let entries = entries
            .into_iter()
            .map(|(id, value)| Ok((id, self.encode_payload(value)?)))
            .collect::<Result<Vec<_>>>()?;

        let groups = self.keys.partition(namespace, entries);
        let tasks = groups.into_values().map(|group| {
            let backend = self.backend.clone();
            async move {
                let items = group.into_iter().map(|t| (t.key, t.payload)).collect();
                backend.mset(items, expiry(ttl)).await
            }
        });

        self.timed("MSET", fan_out("MSET", tasks)).await?;
        Ok(())
    }

    pub async fn batch_del(&self, namespace: &str, ids: &[K]) -> Result<()> {
        if ids.is_empty() || !self.enabled {
            return Ok(());
        }

        let groups = self.keys.partition(namespace, ids.iter().map(|id| (id.clone(), ())));
        let tasks = groups.into_values().map(|group| {
            let backend = self.backend.clone();
            async move {
                let keys: Vec<String> = group.into_iter().map(|t| t.key).collect();
                backend.del(&keys).await
            }
        });

        self.timed("DEL", fan_out("DEL", tasks)).await?;
        Ok(())
    }

    /// Single-key read without partitioning
    pub async fn get(&self, namespace: &str, id: &K) -> Result<Option<Bytes>> {
        if !self.enabled {
            return Ok(None);
        }
        let key = self.keys.tag(namespace, id).key;
        match self.timed("GET", self.backend.get(&key)).await? {
            Some(raw) => Ok(Some(self.decode_payload(raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, namespace: &str, id: &K, value: Bytes, ttl: Duration) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let key = self.keys.tag(namespace, id).key;
        let value = self.encode_payload(value)?;
        self.timed("SET", self.backend.set(&key, value, expiry(ttl))).await
    }

    /// Returns whether the key existed
    pub async fn del(&self, namespace: &str, id: &K) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        let key = self.keys.tag(namespace, id).key;
        let removed = self.timed("DEL", self.backend.del(&[key])).await?;
        Ok(removed > 0)
    }
}

/// Collection primitives used by the index stores
impl<K> ShardedClient<K> {
    pub async fn del_collection(&self, key: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.timed("DEL", self.backend.del(&[key.to_string()])).await?;
        Ok(())
    }

    pub async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        if !self.enabled || members.is_empty() {
            return Ok(0);
        }
        self.timed("ZADD", self.backend.zadd(key, members)).await
    }

    pub async fn zrevrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.timed("ZREVRANGEBYSCORE", self.backend.zrevrange_by_score(key, range, limit))
            .await
    }

    pub async fn zrem(&self, key: &str, members: &[String]) -> Result<u64> {
        if !self.enabled || members.is_empty() {
            return Ok(0);
        }
        self.timed("ZREM", self.backend.zrem(key, members)).await
    }

    pub async fn zremrange_by_score(&self, key: &str, range: ScoreRange) -> Result<u64> {
        if !self.enabled {
            return Ok(0);
        }
        self.timed("ZREMRANGEBYSCORE", self.backend.zremrange_by_score(key, range))
            .await
    }

    pub async fn geoadd(&self, key: &str, points: &[GeoPoint]) -> Result<u64> {
        if !self.enabled || points.is_empty() {
            return Ok(0);
        }
        self.timed("GEOADD", self.backend.geoadd(key, points)).await
    }

    pub async fn georadius(&self, key: &str, center: Coordinate, radius_km: f64) -> Result<Vec<GeoMatch>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.timed("GEORADIUS", self.backend.georadius(key, center, radius_km))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FailingBackend;

    fn config() -> CacheConfig {
        CacheConfig::default().with_prefix("Test").with_hashtag_position(3)
    }

    fn entries(ids: &[i64]) -> Vec<(i64, Bytes)> {
        ids.iter()
            .map(|id| (*id, Bytes::from(format!("v{}", id))))
            .collect()
    }

    #[tokio::test]
    async fn test_batch_set_then_get() {
        let client = ShardedClient::<i64>::in_memory(&config());
        client
            .batch_set("posts", Duration::from_secs(3600), entries(&[10001, 10002, 10003, 20001]))
            .await
            .unwrap();

        let got = client.batch_get("posts", &[10001, 10008, 20001]).await.unwrap();
        let mut values = got.values.clone();
        values.sort();
        assert_eq!(
            values,
            vec![
                (10001, Bytes::from_static(b"v10001")),
                (20001, Bytes::from_static(b"v20001")),
            ]
        );
        assert_eq!(got.missing, vec![10008]);
        assert!(client.metrics().ops_by_command().contains_key("MGET"));
    }

    #[tokio::test]
    async fn test_batch_keys_are_tagged() {
        let store = MemoryStore::new();
        let client = ShardedClient::<i64>::new(&config(), Arc::new(store.clone()));
        client.batch_set("posts", Duration::ZERO, entries(&[10001])).await.unwrap();
        assert_eq!(store.keys(), vec!["{Test:posts:10}001".to_string()]);
    }

    #[tokio::test]
    async fn test_set_twice_is_idempotent() {
        let store = MemoryStore::new();
        let client = ShardedClient::<i64>::new(&config(), Arc::new(store.clone()));
        client.batch_set("posts", Duration::ZERO, entries(&[1])).await.unwrap();
        client.batch_set("posts", Duration::ZERO, entries(&[1])).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            client.get("posts", &1).await.unwrap(),
            Some(Bytes::from_static(b"v1"))
        );
    }

    #[tokio::test]
    async fn test_compression_is_transparent() {
        let store = MemoryStore::new();
        let client = ShardedClient::<i64>::new(&config().with_compression(true), Arc::new(store.clone()));
        client.batch_set("posts", Duration::ZERO, entries(&[10001])).await.unwrap();

        // stored bytes carry the gzip magic
        let raw = store.get("{Test:posts:10}001").await.unwrap().unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);

        let got = client.batch_get("posts", &[10001]).await.unwrap();
        assert_eq!(got.values, vec![(10001, Bytes::from_static(b"v10001"))]);
        assert_eq!(client.get("posts", &10001).await.unwrap(), Some(Bytes::from_static(b"v10001")));
    }

    #[tokio::test]
    async fn test_decompression_failure_aborts_read() {
        let store = MemoryStore::new();
        let plain = ShardedClient::<i64>::new(&config(), Arc::new(store.clone()));
        plain.batch_set("posts", Duration::ZERO, entries(&[10001])).await.unwrap();

        let gzip = ShardedClient::<i64>::new(&config().with_compression(true), Arc::new(store));
        let err = gzip.batch_get("posts", &[10001]).await.unwrap_err();
        assert!(matches!(err, CacheError::Compression { .. }));
    }

    #[tokio::test]
    async fn test_batch_del() {
        let client = ShardedClient::<i64>::in_memory(&config());
        client.batch_set("posts", Duration::ZERO, entries(&[1001, 1002, 1003])).await.unwrap();
        tokio_test::assert_ok!(client.batch_del("posts", &[1001, 1003, 1007]).await);

        let got = client.batch_get("posts", &[1001, 1002, 1003]).await.unwrap();
        assert_eq!(got.values.len(), 1);
        let mut missing = got.missing;
        missing.sort();
        assert_eq!(missing, vec![1001, 1003]);
    }

    #[tokio::test]
    async fn test_single_key_string_operations() {
        let client = ShardedClient::<String>::in_memory(&config());
        let id = "jk".to_string();
        client
            .set("user", &id, Bytes::from_static(b"2002 JK "), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(client.get("user", &id).await.unwrap(), Some(Bytes::from_static(b"2002 JK ")));
        assert!(client.del("user", &id).await.unwrap());
        assert_eq!(client.get("user", &id).await.unwrap(), None);
        assert!(!client.del("user", &id).await.unwrap());
    }

    #[tokio::test]
    async fn test_first_partition_error_is_returned() {
        let backend = FailingBackend::new();
        backend.fail_reads(true);
        let client = ShardedClient::<i64>::new(&config(), Arc::new(backend));

        let err = client.batch_get("posts", &[10001, 20001, 30001]).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_first_partition_error_aborts_siblings() {
        let backend = FailingBackend::new();
        backend.split_mget("posts:10", "posts:20");
        let client = ShardedClient::<i64>::new(&config(), Arc::new(backend.clone()));

        let err = tokio::time::timeout(Duration::from_secs(5), client.batch_get("posts", &[10001, 20001]))
            .await
            .expect("batch_get waited on the stalled partition")
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(backend.mget_calls(), 2);

        // aborted tasks are dropped the next time the scheduler visits them
        for _ in 0..100 {
            if backend.stalls_dropped() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(backend.stalls_dropped(), 1);
        assert_eq!(backend.mgets_completed(), 0);
    }

    #[tokio::test]
    async fn test_disabled_client_always_misses() {
        let store = MemoryStore::new();
        let client = ShardedClient::<i64>::new(&config().with_enabled(false), Arc::new(store.clone()));
        client.batch_set("posts", Duration::ZERO, entries(&[1, 2])).await.unwrap();
        assert!(store.is_empty());

        let got = client.batch_get("posts", &[1, 2]).await.unwrap();
        assert!(got.values.is_empty());
        assert_eq!(got.missing, vec![1, 2]);
        assert!(client
            .zrevrange_by_score("Test:item:x", ScoreRange::all(), None)
            .await
            .unwrap()
            .is_empty());
    }
}
