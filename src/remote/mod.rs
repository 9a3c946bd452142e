//! Remote Backend
//!
//! Speaks RESP2 to one or more independent nodes. The slot space is split
//! evenly over the configured endpoints; every key goes to the node owning
//! its slot, so keys sharing a `{tag}` always land on the same node.

mod connection;

pub use connection::Connection;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;
use hashbrown::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::{Backend, Coordinate, GeoMatch, GeoPoint, ScoreRange};
use crate::cluster::ShardMap;
use crate::error::{CacheError, Result};
use crate::protocol::{response, Command, Frame};

/// One endpoint with its lazily opened connection
struct Node {
    addr: String,
    conn: Mutex<Option<Connection>>,
}

impl Node {
    fn new(addr: String) -> Self {
        Self {
            addr,
            conn: Mutex::new(None),
        }
    }

    /// Run a pipeline, connecting first if needed. Any failure drops the
    /// connection so the next call starts clean.
    async fn pipeline(&self, commands: Vec<Command>, timeout: Duration) -> Result<Vec<Frame>> {
        let mut slot = self.conn.lock().await;

        let outcome = tokio::time::timeout(timeout, async {
            let conn = match slot.take() {
                Some(conn) => conn,
                None => {
                    let conn = Connection::connect(&self.addr).await?;
                    info!(addr = %self.addr, "connected to cache node");
                    conn
                }
            };
            slot.insert(conn).pipeline(commands).await
        })
        .await;

        let result = outcome.unwrap_or_else(|_| Err(CacheError::timeout(&self.addr)));
        if let Err(err) = &result {
            if slot.take().is_some() {
                debug!(addr = %self.addr, error = %err, "dropping connection");
            }
        }
        result
    }
}

/// RESP client over a static set of nodes
pub struct RemoteBackend {
    nodes: Vec<Node>,
    shards: ShardMap,
    timeout: Duration,
}

impl fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addrs: Vec<&str> = self.nodes.iter().map(|n| n.addr.as_str()).collect();
        f.debug_struct("RemoteBackend")
            .field("nodes", &addrs)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemoteBackend {
    /// No connection is opened until the first command.
    pub fn new(addresses: Vec<String>, timeout: Duration) -> Result<Self> {
        if addresses.is_empty() {
            return Err(CacheError::Configuration("no backend address configured"));
        }
        Ok(Self {
            shards: ShardMap::new(addresses.len()),
            nodes: addresses.into_iter().map(Node::new).collect(),
            timeout,
        })
    }

    fn node_for(&self, key: &str) -> &Node {
        &self.nodes[self.shards.node_for_key(key.as_bytes())]
    }

    async fn call(&self, key: &str, command: Command) -> Result<Frame> {
        let node = self.node_for(key);
        let mut replies = node.pipeline(vec![command], self.timeout).await?;
        replies
            .pop()
            .ok_or_else(|| CacheError::Protocol("missing reply".into()))
    }

    /// Request positions grouped by owning node, request order kept
    fn group_by_node<'a, I>(&self, keys: I) -> HashMap<usize, Vec<usize>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for (index, key) in keys.into_iter().enumerate() {
            groups
                .entry(self.shards.node_for_key(key.as_bytes()))
                .or_default()
                .push(index);
        }
        groups
    }

    /// Check every node answers
    pub async fn ping(&self) -> Result<()> {
        try_join_all(self.nodes.iter().map(|node| async move {
            let mut replies = node.pipeline(vec![Command::ping()], self.timeout).await?;
            response::ok(replies.pop().unwrap_or(Frame::Null))
        }))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        response::bulk(self.call(key, Command::get(key)).await?)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        response::ok(self.call(key, Command::set(key, value, ttl)).await?)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let groups = self.group_by_node(keys);
        let partials = try_join_all(groups.into_iter().map(|(node, positions)| async move {
            let command = Command::mget(positions.iter().map(|&i| &keys[i]));
            let mut replies = self.nodes[node].pipeline(vec![command], self.timeout).await?;
            let values = response::bulk_array(replies.pop().unwrap_or(Frame::Null))?;
            if values.len() != positions.len() {
                return Err(CacheError::Protocol(format!(
                    "MGET returned {} values for {} keys",
                    values.len(),
                    positions.len()
                )));
            }
            Ok::<_, CacheError>(positions.into_iter().zip(values))
        }))
        .await?;

        let mut merged = vec![None; keys.len()];
        for (position, value) in partials.into_iter().flatten() {
            merged[position] = value;
        }
        Ok(merged)
    }

    async fn mset(&self, entries: Vec<(String, Bytes)>, ttl: Option<Duration>) -> Result<()> {
        let mut per_node: HashMap<usize, Vec<Command>> = HashMap::new();
        for (key, value) in entries {
            let node = self.shards.node_for_key(key.as_bytes());
            per_node
                .entry(node)
                .or_default()
                .push(Command::set(&key, value, ttl));
        }

        try_join_all(per_node.into_iter().map(|(node, commands)| async move {
            let replies = self.nodes[node].pipeline(commands, self.timeout).await?;
            replies.into_iter().try_for_each(response::ok)
        }))
        .await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let groups = self.group_by_node(keys);
        let counts = try_join_all(groups.into_iter().map(|(node, positions)| async move {
            let command = Command::del(positions.iter().map(|&i| &keys[i]));
            let mut replies = self.nodes[node].pipeline(vec![command], self.timeout).await?;
            response::integer(replies.pop().unwrap_or(Frame::Null))
        }))
        .await?;
        Ok(counts.into_iter().sum())
    }

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        response::integer(self.call(key, Command::zadd(key, members)).await?)
    }

    async fn zrevrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>> {
        response::scored_members(self.call(key, Command::zrevrange_by_score(key, range, limit)).await?)
    }

    async fn zrem(&self, key: &str, members: &[String]) -> Result<u64> {
        response::integer(self.call(key, Command::zrem(key, members)).await?)
    }

    async fn zremrange_by_score(&self, key: &str, range: ScoreRange) -> Result<u64> {
        response::integer(self.call(key, Command::zremrange_by_score(key, range)).await?)
    }

    async fn geoadd(&self, key: &str, points: &[GeoPoint]) -> Result<u64> {
        response::integer(self.call(key, Command::geoadd(key, points)).await?)
    }

    async fn georadius(&self, key: &str, center: Coordinate, radius_km: f64) -> Result<Vec<GeoMatch>> {
        response::geo_matches(self.call(key, Command::georadius(key, center, radius_km)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RespCodec;
    use futures::{SinkExt, StreamExt};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    type Data = Arc<parking_lot::Mutex<std::collections::HashMap<Bytes, Bytes>>>;

    /// Minimal string-only node
    fn execute(args: Vec<Bytes>, data: &Data) -> Frame {
        let name = String::from_utf8_lossy(&args[0]).to_uppercase();
        let mut data = data.lock();
        match name.as_str() {
            "PING" => Frame::Simple("PONG".into()),
            "GET" => data.get(&args[1]).cloned().map(Frame::Bulk).unwrap_or(Frame::Null),
            "SET" => {
                data.insert(args[1].clone(), args[2].clone());
                Frame::Simple("OK".into())
            }
            "MGET" => Frame::Array(
                args[1..]
                    .iter()
                    .map(|k| data.get(k).cloned().map(Frame::Bulk).unwrap_or(Frame::Null))
                    .collect(),
            ),
            "DEL" => Frame::Integer(args[1..].iter().filter(|k| data.remove(*k).is_some()).count() as i64),
            _ => Frame::Error(format!("ERR unknown command '{}'", name)),
        }
    }

    async fn spawn_node() -> (String, Data) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let data = Data::default();
        let shared = data.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let data = shared.clone();
                tokio::spawn(async move {
                    let mut framed = Framed::new(socket, RespCodec::new());
                    while let Some(Ok(Frame::Array(items))) = framed.next().await {
                        let args = items
                            .into_iter()
                            .filter_map(|f| match f {
                                Frame::Bulk(b) => Some(b),
                                _ => None,
                            })
                            .collect();
                        let reply = execute(args, &data);
                        if framed.send(reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        (addr, data)
    }

    #[tokio::test]
    async fn test_keys_spread_over_nodes_and_merge_in_order() {
        let (a, data_a) = spawn_node().await;
        let (b, data_b) = spawn_node().await;
        let backend = RemoteBackend::new(vec![a, b], Duration::from_secs(2)).unwrap();
        backend.ping().await.unwrap();

        let entries: Vec<(String, Bytes)> = (0..64)
            .map(|i| (format!("key:{}", i), Bytes::from(format!("v{}", i))))
            .collect();
        backend.mset(entries, None).await.unwrap();
        assert!(!data_a.lock().is_empty());
        assert!(!data_b.lock().is_empty());
        assert_eq!(data_a.lock().len() + data_b.lock().len(), 64);

        let keys: Vec<String> = vec!["key:7".into(), "missing".into(), "key:42".into(), "key:0".into()];
        let values = backend.mget(&keys).await.unwrap();
        assert_eq!(
            values,
            vec![
                Some(Bytes::from_static(b"v7")),
                None,
                Some(Bytes::from_static(b"v42")),
                Some(Bytes::from_static(b"v0")),
            ]
        );

        assert_eq!(backend.del(&keys).await.unwrap(), 3);
        assert_eq!(backend.get("key:7").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tagged_keys_share_a_node() {
        let (a, data_a) = spawn_node().await;
        let (b, data_b) = spawn_node().await;
        let backend = RemoteBackend::new(vec![a, b], Duration::from_secs(2)).unwrap();

        let entries: Vec<(String, Bytes)> = (0..20)
            .map(|i| (format!("{{Test:posts:1}}{:03}", i), Bytes::from_static(b"x")))
            .collect();
        backend.mset(entries, None).await.unwrap();

        let (a, b) = (data_a.lock().len(), data_b.lock().len());
        assert!(a == 20 && b == 0 || a == 0 && b == 20);
    }

    #[tokio::test]
    async fn test_error_reply_is_server_error() {
        let (addr, _) = spawn_node().await;
        let backend = RemoteBackend::new(vec![addr], Duration::from_secs(2)).unwrap();
        let err = backend.zadd("z", &[(1.0, "m".into())]).await.unwrap_err();
        assert!(matches!(err, CacheError::Server(msg) if msg.contains("unknown command")));

        // the connection survives an error reply
        backend.set("k", Bytes::from_static(b"v"), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
    }

    #[tokio::test]
    async fn test_unresponsive_node_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let backend = RemoteBackend::new(vec![addr], Duration::from_millis(100)).unwrap();
        let err = backend.get("k").await.unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let backend = RemoteBackend::new(vec![addr], Duration::from_secs(1)).unwrap();
        assert!(backend.get("k").await.unwrap_err().is_transport());
    }

    #[test]
    fn test_requires_an_address() {
        assert!(matches!(
            RemoteBackend::new(Vec::new(), Duration::from_secs(1)),
            Err(CacheError::Configuration(_))
        ));
    }
}
