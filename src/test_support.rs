//! Test doubles for backend failures

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::backend::{Backend, Coordinate, GeoMatch, GeoPoint, ScoreRange};
use crate::error::{CacheError, Result};
use crate::storage::MemoryStore;

/// MemoryStore wrapper whose reads or writes can be switched to fail
#[derive(Debug, Clone, Default)]
pub struct FailingBackend {
    pub store: MemoryStore,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    mgets: Arc<AtomicUsize>,
    mgets_completed: Arc<AtomicUsize>,
    /// MGETs touching a key containing this fail once a stalled MGET runs
    fail_mget_on: Arc<Mutex<Option<String>>>,
    /// MGETs touching a key containing this never complete
    stall_mget_on: Arc<Mutex<Option<String>>>,
    stall_started: Arc<Notify>,
    stalls_dropped: Arc<AtomicUsize>,
}

/// Counts a stalled MGET future being dropped before it finished
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn touches(keys: &[String], pattern: Option<&str>) -> bool {
    pattern.is_some_and(|pattern| keys.iter().any(|key| key.contains(pattern)))
}

impl FailingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Split MGETs by key: those touching `fail` error out after one
    /// touching `stall` has started, and that one hangs forever.
    pub fn split_mget(&self, fail: &str, stall: &str) {
        *self.fail_mget_on.lock() = Some(fail.to_string());
        *self.stall_mget_on.lock() = Some(stall.to_string());
    }

    /// MGET calls that got past the read failure switch
    pub fn mget_calls(&self) -> usize {
        self.mgets.load(Ordering::SeqCst)
    }

    /// MGET calls that returned values from the store
    pub fn mgets_completed(&self) -> usize {
        self.mgets_completed.load(Ordering::SeqCst)
    }

    /// Stalled MGETs dropped by their caller
    pub fn stalls_dropped(&self) -> usize {
        self.stalls_dropped.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(reset());
        }
        Ok(())
    }
}

fn reset() -> CacheError {
    CacheError::from(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    ))
}

#[async_trait]
impl Backend for FailingBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check(&self.fail_reads)?;
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.check(&self.fail_writes)?;
        self.store.set(key, value, ttl).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.check(&self.fail_reads)?;
        self.mgets.fetch_add(1, Ordering::SeqCst);

        let stall = self.stall_mget_on.lock().clone();
        if touches(keys, stall.as_deref()) {
            let _dropped = DropCounter(self.stalls_dropped.clone());
            self.stall_started.notify_one();
            std::future::pending::<()>().await;
        }
        let fail = self.fail_mget_on.lock().clone();
        if touches(keys, fail.as_deref()) {
            self.stall_started.notified().await;
            return Err(reset());
        }

        let values = self.store.mget(keys).await?;
        self.mgets_completed.fetch_add(1, Ordering::SeqCst);
        Ok(values)
    }

    async fn mset(&self, entries: Vec<(String, Bytes)>, ttl: Option<Duration>) -> Result<()> {
        self.check(&self.fail_writes)?;
        self.store.mset(entries, ttl).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check(&self.fail_writes)?;
        self.store.del(keys).await
    }

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        self.check(&self.fail_writes)?;
        self.store.zadd(key, members).await
    }

    async fn zrevrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>> {
        self.check(&self.fail_reads)?;
        self.store.zrevrange_by_score(key, range, limit).await
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64> {
        self.check(&self.fail_writes)?;
        self.store.zrem(key, members).await
    }

    async fn zremrange_by_score(&self, key: &str, range: ScoreRange) -> Result<u64> {
        self.check(&self.fail_writes)?;
        self.store.zremrange_by_score(key, range).await
    }

    async fn geoadd(&self, key: &str, points: &[GeoPoint]) -> Result<u64> {
        self.check(&self.fail_writes)?;
        self.store.geoadd(key, points).await
    }

    async fn georadius(&self, key: &str, center: Coordinate, radius_km: f64) -> Result<Vec<GeoMatch>> {
        self.check(&self.fail_reads)?;
        self.store.georadius(key, center, radius_km).await
    }
}
