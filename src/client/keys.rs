//! Physical key layout and shard tagging
//!
//! Physical keys are `prefix:namespace:id`. When a key is longer than the
//! hashtag position, everything before the last `hashtag_position` bytes is
//! wrapped in `{}` so neighbouring ids (e.g. `posts:10001` and `posts:10002`
//! with a position of 3) share a tag, hash to the same slot and can be
//! batched in one round-trip.

use std::fmt::Display;

use hashbrown::HashMap;

use crate::error::{CacheError, Result};

/// A physical key together with the tag it routes by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedKey {
    /// `{prefix-part}` or empty when the key routes alone
    pub tag: String,
    /// Key as sent to the backing service
    pub key: String,
}

/// One entry of a tag partition
#[derive(Debug, Clone)]
pub struct Tagged<K, T> {
    pub key: String,
    pub id: K,
    pub payload: T,
}

/// Key construction rules for one client
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
    hashtag_position: usize,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>, hashtag_position: usize) -> Self {
        Self {
            prefix: prefix.into(),
            hashtag_position,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Reject namespaces that would make physical keys ambiguous.
    pub fn validate_namespace(namespace: &str) -> Result<()> {
        if namespace.is_empty() {
            return Err(CacheError::Configuration("namespace must not be empty"));
        }
        if namespace.contains([':', '{', '}']) {
            return Err(CacheError::Configuration(
                "namespace must not contain ':', '{' or '}'",
            ));
        }
        Ok(())
    }

    pub fn make_key(&self, namespace: &str, id: &impl Display) -> String {
        format!("{}:{}:{}", self.prefix, namespace, id)
    }

    /// Key of a whole collection (geo set) owned by a namespace
    pub fn collection_key(&self, namespace: &str) -> String {
        format!("{}:{}", self.prefix, namespace)
    }

    pub fn tag(&self, namespace: &str, id: &impl Display) -> TaggedKey {
        let key = self.make_key(namespace, id);
        if key.len() <= self.hashtag_position {
            return TaggedKey {
                tag: String::new(),
                key,
            };
        }

        // split on a char boundary at or before the byte position
        let mut pos = key.len() - self.hashtag_position;
        while !key.is_char_boundary(pos) {
            pos -= 1;
        }
        let tag = format!("{{{}}}", &key[..pos]);
        let tagged = format!("{}{}", tag, &key[pos..]);
        TaggedKey { tag, key: tagged }
    }

    /// Group entries by shard tag, keeping request order inside a group
    pub fn partition<K: Display, T>(
        &self,
        namespace: &str,
        entries: impl IntoIterator<Item = (K, T)>,
    ) -> HashMap<String, Vec<Tagged<K, T>>> {
        let mut groups: HashMap<String, Vec<Tagged<K, T>>> = HashMap::new();
        for (id, payload) in entries {
            let TaggedKey { tag, key } = self.tag(namespace, &id);
            groups.entry(tag).or_default().push(Tagged { key, id, payload });
        }
        groups
    }
}
