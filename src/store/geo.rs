//! Geo store: one geospatial index per namespace

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{accessor, Cacheable, KeyFn, LocationFn};
use crate::backend::{Coordinate, GeoPoint};
use crate::client::{CacheKey, KeySpace, ShardedClient};
use crate::error::{CacheError, Result};

pub struct GeoStore<K, V> {
    client: ShardedClient<K>,
    namespace: String,
    entities: Arc<dyn Cacheable<K, V>>,
    key_of: Option<KeyFn<K, V>>,
    location_of: Option<LocationFn<V>>,
}

impl<K, V> fmt::Debug for GeoStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoStore")
            .field("namespace", &self.namespace)
            .field("key_of", &self.key_of.is_some())
            .field("location_of", &self.location_of.is_some())
            .finish()
    }
}

impl<K: CacheKey, V: Send + Sync + 'static> GeoStore<K, V> {
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
            location_of: None,
        })
    }

    pub fn with_key(mut self, key_of: impl Fn(&V) -> K + Send + Sync + 'static) -> Self {
        self.key_of = Some(Arc::new(key_of));
        self
    }

    pub fn with_location(mut self, location_of: impl Fn(&V) -> Coordinate + Send + Sync + 'static) -> Self {
        self.location_of = Some(Arc::new(location_of));
        self
    }

    fn collection_key(&self) -> String {
        self.client.key_space().collection_key(&self.namespace)
    }

    /// Index `item` at its location. The entity itself is not persisted.
    pub async fn add(&self, item: &V) -> Result<()> {
        self.add_many(std::slice::from_ref(item)).await
    }

    pub async fn add_many(&self, items: &[V]) -> Result<()> {
        let key_of = accessor(&self.key_of, "geo member key accessor not set")?;
        let location_of = accessor(&self.location_of, "geo location accessor not set")?;

        let points: Vec<GeoPoint> = items
            .iter()
            .map(|item| GeoPoint {
                member: key_of(item).to_string(),
                coordinate: location_of(item),
            })
            .collect();
        self.client.geoadd(&self.collection_key(), &points).await?;
        Ok(())
    }

    pub async fn remove(&self, keys: &[K]) -> Result<()> {
        let members: Vec<String> = keys.iter().map(ToString::to_string).collect();
        self.client.zrem(&self.collection_key(), &members).await?;
        Ok(())
    }

    /// Entities within `radius_km` of (`lat`, `lon`), nearest first.
    ///
    /// Members without a cached entity are skipped.
    pub async fn get(&self, lat: f64, lon: f64, radius_km: f64) -> Result<Vec<V>> {
        let matches = self
            .client
            .georadius(&self.collection_key(), Coordinate::new(lat, lon), radius_km)
            .await?;

        let keys = matches
            .iter()
            .map(|m| {
                K::parse_member(&m.member)
                    .ok_or_else(|| CacheError::encoding(format!("geo member {:?}", m.member), "not a valid key"))
            })
            .collect::<Result<Vec<K>>>()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values = self.entities.get(&keys).await?;
        let dangling = values.iter().filter(|v| v.is_none()).count();
        if dangling > 0 {
            debug!(namespace = %self.namespace, dangling, "skipping geo members without cached entity");
        }
        Ok(values.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::EntityStore;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Truck {
        id: String,
        lat: f64,
        lon: f64,
    }

    crate::json_codec!(Truck);

    fn truck(id: &str, lat: f64, lon: f64) -> Truck {
        Truck {
            id: id.to_string(),
            lat,
            lon,
        }
    }

    fn stores() -> (EntityStore<String, Truck>, GeoStore<String, Truck>) {
        let client = ShardedClient::in_memory(&CacheConfig::default().with_prefix("Test"));
        let entities = EntityStore::new("truck", Duration::ZERO, client.clone())
            .unwrap()
            .with_key(|t: &Truck| t.id.clone());
        let geo = GeoStore::new("geo", client, Arc::new(entities.clone()))
            .unwrap()
            .with_key(|t: &Truck| t.id.clone())
            .with_location(|t: &Truck| Coordinate::new(t.lat, t.lon));
        (entities, geo)
    }

    #[tokio::test]
    async fn test_added_entity_found_within_radius() {
        let (entities, geo) = stores();
        let t = truck("1", 37.7749, -122.4194);
        entities.set(&[t.clone()]).await.unwrap();
        geo.add(&t).await.unwrap();

        assert_eq!(geo.get(37.7749, -122.4194, 0.5).await.unwrap(), vec![t]);
    }

    #[tokio::test]
    async fn test_far_query_is_empty() {
        let (entities, geo) = stores();
        let t = truck("1", 37.7749, -122.4194);
        entities.set(&[t.clone()]).await.unwrap();
        geo.add(&t).await.unwrap();

        // Los Angeles is ~550 km away
        assert!(geo.get(34.0522, -118.2437, 10.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_results_nearest_first() {
        let (entities, geo) = stores();
        let near = truck("near", 37.7750, -122.4195);
        let far = truck("far", 37.7850, -122.4094);
        entities.set(&[near.clone(), far.clone()]).await.unwrap();
        geo.add_many(&[far.clone(), near.clone()]).await.unwrap();

        assert_eq!(geo.get(37.7749, -122.4194, 5.0).await.unwrap(), vec![near, far]);
    }

    #[tokio::test]
    async fn test_add_does_not_persist_entity() {
        let (_, geo) = stores();
        geo.add(&truck("1", 10.0, 10.0)).await.unwrap();
        assert!(geo.get(10.0, 10.0, 1.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let (entities, geo) = stores();
        let t = truck("1", 10.0, 10.0);
        entities.set(&[t.clone()]).await.unwrap();
        geo.add(&t).await.unwrap();
        geo.remove(&["1".to_string()]).await.unwrap();
        assert!(geo.get(10.0, 10.0, 1.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_coordinate_rejected() {
        let (_, geo) = stores();
        let err = geo.add(&truck("pole", 89.9, 0.0)).await.unwrap_err();
        assert!(matches!(err, CacheError::Server(_)));
    }
}
