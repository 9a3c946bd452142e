//! Slice store: score-ordered membership index per slice id

use std::fmt::{self, Display};
use std::sync::Arc;

use tracing::debug;

use super::{accessor, Cacheable, KeyFn, ScoreFn};
use crate::backend::ScoreRange;
use crate::client::{CacheKey, KeySpace, ShardedClient};
use crate::error::{ignore_missing_key, CacheError, Result};

/// Position of the last member handed out by a descending scan
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub score: f64,
    pub member: String,
}

impl Cursor {
    /// Whether `(member, score)` sorts at or before this position. Members
    /// come highest score first, ties in reverse byte order.
    fn covers(&self, member: &str, score: f64) -> bool {
        score > self.score || (score == self.score && member >= self.member.as_str())
    }
}

/// One page of a descending scan
#[derive(Debug, Clone)]
pub struct Page<V> {
    pub items: Vec<V>,
    /// Pass back as the cursor for the next page; `None` when exhausted
    pub next: Option<Cursor>,
}

pub struct SliceStore<K, V> {
    client: ShardedClient<K>,
    namespace: String,
    entities: Arc<dyn Cacheable<K, V>>,
    key_of: Option<KeyFn<K, V>>,
    score_of: Option<ScoreFn<V>>,
}

impl<K, V> fmt::Debug for SliceStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceStore")
            .field("namespace", &self.namespace)
            .field("key_of", &self.key_of.is_some())
            .field("score_of", &self.score_of.is_some())
            .finish()
    }
}

impl<K: CacheKey, V: Send + Sync + 'static> SliceStore<K, V> {
    pub fn new(
        namespace: impl Into<String>,
        client: ShardedClient<K>,
        entities: Arc<dyn Cacheable<K, V>>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        KeySpace::validate_namespace(&namespace)?;
        Ok(Self {
            client,
            namespace,
            entities,
            key_of: None,
            score_of: None,
        })
    }

    pub fn with_key(mut self, key_of: impl Fn(&V) -> K + Send + Sync + 'static) -> Self {
        self.key_of = Some(Arc::new(key_of));
        self
    }

    pub fn with_score(mut self, score_of: impl Fn(&V) -> f64 + Send + Sync + 'static) -> Self {
        self.score_of = Some(Arc::new(score_of));
        self
    }

    pub fn slice_key(&self, slice: &impl Display) -> String {
        self.client.make_key(&self.namespace, slice)
    }

    /// Persist `items` in the entity store, then index them under `slice`.
    ///
    /// Nothing is indexed when the entity write fails. The two writes are not
    /// atomic.
    pub async fn add_members(&self, slice: &impl Display, items: &[V]) -> Result<()> {
        let key_of = accessor(&self.key_of, "slice member key accessor not set")?;
        let score_of = accessor(&self.score_of, "slice score accessor not set")?;
        if items.is_empty() {
            return Ok(());
        }

        self.entities.set(items).await?;

        let members: Vec<(f64, String)> = items
            .iter()
            .map(|item| (score_of(item), key_of(item).to_string()))
            .collect();
        self.client.zadd(&self.slice_key(slice), &members).await?;
        Ok(())
    }

    pub async fn del_slice(&self, slice: &impl Display) -> Result<()> {
        self.client.del_collection(&self.slice_key(slice)).await
    }

    /// Drop members from the index; their entities stay cached.
    pub async fn del_members(&self, slice: &impl Display, keys: &[K]) -> Result<()> {
        let members: Vec<String> = keys.iter().map(ToString::to_string).collect();
        self.client.zrem(&self.slice_key(slice), &members).await?;
        Ok(())
    }

    /// Every member entity, highest score first.
    ///
    /// An absent slice is empty. Members whose entity is no longer cached
    /// are skipped.
    pub async fn members(&self, slice: &impl Display) -> Result<Vec<V>> {
        let entries = ignore_missing_key(
            self.client
                .zrevrange_by_score(&self.slice_key(slice), ScoreRange::all(), None)
                .await,
        )?;
        self.resolve(entries.into_iter().map(|(member, _)| member)).await
    }

    /// Up to `count` members following `cursor` (or from the top when
    /// `cursor` is `None`), highest score first.
    ///
    /// Members tied on the cursor score that did not fit on the previous
    /// page are returned before lower scores.
    pub async fn rev_range(&self, slice: &impl Display, cursor: Option<&Cursor>, count: usize) -> Result<Page<V>> {
        if count == 0 {
            return Ok(Page {
                items: Vec::new(),
                next: cursor.cloned(),
            });
        }

        let key = self.slice_key(slice);
        let range = match cursor {
            Some(cursor) => ScoreRange::at_most(cursor.score),
            None => ScoreRange::all(),
        };

        // widen the window until the tied members already seen are skipped
        let mut limit = count;
        let entries = loop {
            let fetched = ignore_missing_key(
                self.client
                    .zrevrange_by_score(&key, range, Some(limit))
                    .await,
            )?;
            let exhausted = fetched.len() < limit;
            let entries: Vec<(String, f64)> = fetched
                .into_iter()
                .skip_while(|(member, score)| cursor.is_some_and(|c| c.covers(member, *score)))
                .take(count)
                .collect();
            if entries.len() == count || exhausted {
                break entries;
            }
            limit = limit.saturating_mul(2);
        };

        let next = if entries.len() == count {
            entries.last().map(|(member, score)| Cursor {
                score: *score,
                member: member.clone(),
            })
        } else {
            None
        };
        let items = self.resolve(entries.into_iter().map(|(member, _)| member)).await?;
        Ok(Page { items, next })
    }

    /// Remove members scored below `min_score`; returns how many were removed.
    pub async fn rev_truncate(&self, slice: &impl Display, min_score: f64) -> Result<u64> {
        ignore_missing_key(
            self.client
                .zremrange_by_score(&self.slice_key(slice), ScoreRange::below(min_score))
                .await,
        )
    }

    async fn resolve(&self, members: impl Iterator<Item = String>) -> Result<Vec<V>> {
        let keys = members
            .map(|member| {
                K::parse_member(&member)
                    .ok_or_else(|| CacheError::encoding(format!("slice member {:?}", member), "not a valid key"))
            })
            .collect::<Result<Vec<K>>>()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values = self.entities.get(&keys).await?;
        let dangling = values.iter().filter(|v| v.is_none()).count();
        if dangling > 0 {
            debug!(namespace = %self.namespace, dangling, "skipping members without cached entity");
        }
        Ok(values.into_iter().flatten().collect())
    }
}
