//! Facility lookups over the entity, item and geo stores

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::{load_csv, CatalogError, Facility};
use crate::backend::Coordinate;
use crate::client::ShardedClient;
use crate::store::{EntityStore, GeoStore, SliceStore};

/// Radius used when a location query falls back to the dataset centre
const FALLBACK_RADIUS_KM: f64 = 1.0;

#[derive(Debug)]
pub struct FacilityService {
    facilities: EntityStore<String, Facility>,
    by_item: SliceStore<String, Facility>,
    by_location: GeoStore<String, Facility>,
    center: RwLock<Coordinate>,
}

impl FacilityService {
    pub fn new(client: ShardedClient<String>) -> Result<Self, CatalogError> {
        let facilities = EntityStore::new("facility", Duration::ZERO, client.clone())?
            .with_key(Facility::key);
        let entities = Arc::new(facilities.clone());

        let by_item = SliceStore::new("item", client.clone(), entities.clone())?
            .with_key(Facility::key)
            // items carry no ranking; members tie and come back in reverse id order
            .with_score(|_| 0.0);
        let by_location = GeoStore::new("geo", client, entities)?
            .with_key(Facility::key)
            .with_location(Facility::coordinate);

        Ok(Self {
            facilities,
            by_item,
            by_location,
            center: RwLock::new(Coordinate::default()),
        })
    }

    /// Load the CSV at `path` and populate every store.
    pub async fn seed(&self, path: impl AsRef<Path>) -> Result<usize, CatalogError> {
        let facilities = load_csv(path)?;
        self.seed_with(&facilities).await?;
        Ok(facilities.len())
    }

    pub async fn seed_with(&self, facilities: &[Facility]) -> Result<(), CatalogError> {
        if facilities.is_empty() {
            warn!("no facilities to seed");
            return Ok(());
        }
        *self.center.write() = centroid(facilities);

        self.facilities.set(facilities).await?;

        let mut per_item: HashMap<&str, Vec<Facility>> = HashMap::new();
        for facility in facilities {
            for item in facility.food_items() {
                per_item.entry(item).or_default().push(facility.clone());
            }
        }
        for (item, members) in &per_item {
            self.by_item.add_members(item, members).await?;
        }

        self.by_location.add_many(facilities).await?;

        info!(
            facilities = facilities.len(),
            items = per_item.len(),
            center = %self.center(),
            "catalog seeded"
        );
        Ok(())
    }

    pub fn center(&self) -> Coordinate {
        *self.center.read()
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Facility, CatalogError> {
        self.facilities
            .get(&[id.to_string()])
            .await?
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    pub async fn get_by_item(&self, item: &str) -> Result<Vec<Facility>, CatalogError> {
        Ok(self.by_item.members(&item.trim()).await?)
    }

    /// Facilities within `radius_km`. A zero longitude, or a zero latitude
    /// with a zero radius, searches 1 km around the dataset centre instead.
    pub async fn get_by_location(&self, lat: f64, lon: f64, radius_km: f64) -> Result<Vec<Facility>, CatalogError> {
        let (lat, lon, radius_km) = if lon == 0.0 || (lat == 0.0 && radius_km == 0.0) {
            let center = self.center();
            (center.lat, center.lon, FALLBACK_RADIUS_KM)
        } else {
            (lat, lon, radius_km)
        };
        Ok(self.by_location.get(lat, lon, radius_km).await?)
    }
}

fn centroid(facilities: &[Facility]) -> Coordinate {
    let n = facilities.len() as f64;
    let (lat, lon) = facilities
        .iter()
        .fold((0.0, 0.0), |(lat, lon), f| (lat + f.latitude, lon + f.longitude));
    Coordinate::new(lat / n, lon / n)
}
