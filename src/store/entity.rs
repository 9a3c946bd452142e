//! Entity store: typed cache-aside over the sharded client

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use super::{accessor, Cacheable, KeyFn};
use crate::client::{CacheKey, KeySpace, ShardedClient};
use crate::coalesce::Coalescer;
use crate::codec::Codec;
use crate::error::{CacheError, CacheWriteWarning, Result};

/// Cache-only read result
#[derive(Debug, Clone)]
pub struct Lookup<K, V> {
    /// One slot per requested key, in request order
    pub values: Vec<Option<V>>,
    /// Requested keys the cache did not hold, first occurrence order
    pub missing: Vec<K>,
}

/// Read-through result.
///
/// A key found neither in cache nor by the fetch leaves `None` in its slot.
#[derive(Debug, Clone)]
pub struct Fetched<V> {
    pub values: Vec<Option<V>>,
    /// Set when fetched values could not be written back
    pub warning: Option<CacheWriteWarning>,
}

/// Typed cache for one namespace
pub struct EntityStore<K, V> {
    client: ShardedClient<K>,
    namespace: String,
    ttl: Duration,
    key_of: Option<KeyFn<K, V>>,
    inflight: Arc<Coalescer<Result<Fetched<V>>>>,
}

impl<K, V> Clone for EntityStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            namespace: self.namespace.clone(),
            ttl: self.ttl,
            key_of: self.key_of.clone(),
            inflight: self.inflight.clone(),
        }
    }
}

impl<K, V> fmt::Debug for EntityStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .field("key_of", &self.key_of.is_some())
            .finish()
    }
}

impl<K, V> EntityStore<K, V>
where
    K: CacheKey,
    V: Codec + Clone + Send + Sync + 'static,
{
    /// `ttl` of zero stores entities without expiry.
    pub fn new(namespace: impl Into<String>, ttl: Duration, client: ShardedClient<K>) -> Result<Self> {
        let namespace = namespace.into();
        KeySpace::validate_namespace(&namespace)?;
        Ok(Self {
            client,
            namespace,
            ttl,
            key_of: None,
            inflight: Arc::new(Coalescer::new()),
        })
    }

    pub fn with_key(mut self, key_of: impl Fn(&V) -> K + Send + Sync + 'static) -> Self {
        self.key_of = Some(Arc::new(key_of));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn client(&self) -> &ShardedClient<K> {
        &self.client
    }

    fn key_fn(&self) -> Result<&(dyn Fn(&V) -> K + Send + Sync)> {
        accessor(&self.key_of, "entity key accessor not set")
    }

    pub async fn set(&self, values: &[V]) -> Result<()> {
        let key_of = self.key_fn()?;
        let entries = values
            .iter()
            .map(|value| Ok((key_of(value), value.encode()?)))
            .collect::<Result<Vec<_>>>()?;
        self.client.batch_set(&self.namespace, self.ttl, entries).await
    }

    pub async fn del(&self, ids: &[K]) -> Result<()> {
        self.key_fn()?;
        self.client.batch_del(&self.namespace, ids).await
    }

    /// Cache-only read keeping request order
    pub async fn get(&self, keys: &[K]) -> Result<Vec<Option<V>>> {
        Ok(self.lookup(keys).await?.values)
    }

    /// Cache-only read that also reports which keys were absent
    pub async fn lookup(&self, keys: &[K]) -> Result<Lookup<K, V>> {
        self.key_fn()?;
        let batch = self.client.batch_get(&self.namespace, keys).await?;

        let mut found: HashMap<K, V> = HashMap::with_capacity(batch.values.len());
        for (id, raw) in batch.values {
            let value = V::decode(&raw).map_err(|err| {
                CacheError::encoding(format!("entity {}:{}", self.namespace, id), err)
            })?;
            found.insert(id, value);
        }

        let mut seen = HashSet::new();
        let missing: Vec<K> = keys
            .iter()
            .filter(|key| !found.contains_key(*key) && seen.insert(*key))
            .cloned()
            .collect();
        self.client.metrics().record_lookup(found.len(), missing.len());

        let values = keys.iter().map(|key| found.get(key).cloned()).collect();
        Ok(Lookup { values, missing })
    }

    /// Read-through without write-back.
    ///
    /// `fetch` receives the keys the cache did not hold and runs at most once
    /// for concurrent calls with the same keys.
    pub async fn get_fetch<F, Fut, E>(&self, keys: &[K], fetch: F) -> Result<Fetched<V>>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = std::result::Result<Vec<V>, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.coalesced(format!("{:?}", keys), keys, fetch, false).await
    }

    /// Read-through that writes fetched values back to the cache.
    ///
    /// A failed write-back is returned as `Fetched::warning`; the values are
    /// still valid.
    pub async fn get_fetch_set<F, Fut, E>(&self, keys: &[K], fetch: F) -> Result<Fetched<V>>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = std::result::Result<Vec<V>, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.coalesced(format!("S:{:?}", keys), keys, fetch, true).await
    }

    async fn coalesced<F, Fut, E>(&self, signature: String, keys: &[K], fetch: F, write_back: bool) -> Result<Fetched<V>>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = std::result::Result<Vec<V>, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.key_fn()?;
        let (result, shared) = self
            .inflight
            .run(&signature, || self.read_through(keys, fetch, write_back))
            .await;
        if shared {
            self.client.metrics().record_coalesced();
            debug!(namespace = %self.namespace, signature = %signature, "shared in-flight fetch");
        }
        result
    }

    async fn read_through<F, Fut, E>(&self, keys: &[K], fetch: F, write_back: bool) -> Result<Fetched<V>>
    where
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = std::result::Result<Vec<V>, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let key_of = self.key_fn()?;
        let Lookup { mut values, missing } = self.lookup(keys).await?;
        if missing.is_empty() {
            return Ok(Fetched { values, warning: None });
        }

        let fetched = fetch(missing).await.map_err(CacheError::fetch)?;

        let mut slots: HashMap<&K, Vec<usize>> = HashMap::new();
        for (index, key) in keys.iter().enumerate() {
            if values[index].is_none() {
                slots.entry(key).or_default().push(index);
            }
        }
        for item in &fetched {
            if let Some(indexes) = slots.get(&key_of(item)) {
                for &index in indexes {
                    values[index] = Some(item.clone());
                }
            }
        }

        let warning = if write_back && !fetched.is_empty() {
            match self.set(&fetched).await {
                Ok(()) => None,
                Err(source) => {
                    warn!(namespace = %self.namespace, error = %source, "fail to set cache");
                    self.client.metrics().record_write_back_failure();
                    Some(CacheWriteWarning { source })
                }
            }
        } else {
            None
        };

        Ok(Fetched { values, warning })
    }
}

#[async_trait]
impl<K, V> Cacheable<K, V> for EntityStore<K, V>
where
    K: CacheKey,
    V: Codec + Clone + Send + Sync + 'static,
{
    async fn set(&self, values: &[V]) -> Result<()> {
        EntityStore::set(self, values).await
    }

    async fn get(&self, keys: &[K]) -> Result<Vec<Option<V>>> {
        EntityStore::get(self, keys).await
    }
}
