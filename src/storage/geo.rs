//! Geo helpers
//!
//! Distance and coordinate limits matching the Redis geo commands.

use crate::backend::Coordinate;
use crate::error::{CacheError, Result};

/// Earth radius used by Redis geohash distance
const EARTH_RADIUS_IN_METERS: f64 = 6_372_797.560856;

pub const GEO_LAT_MIN: f64 = -85.051_128_78;
pub const GEO_LAT_MAX: f64 = 85.051_128_78;
pub const GEO_LON_MIN: f64 = -180.0;
pub const GEO_LON_MAX: f64 = 180.0;

pub fn validate(coordinate: Coordinate) -> Result<()> {
    let Coordinate { lat, lon } = coordinate;
    if !(GEO_LAT_MIN..=GEO_LAT_MAX).contains(&lat) || !(GEO_LON_MIN..=GEO_LON_MAX).contains(&lon) {
        return Err(CacheError::Server(format!(
            "ERR invalid longitude,latitude pair {:.6},{:.6}",
            lon, lat
        )));
    }
    Ok(())
}

/// Haversine great-circle distance in kilometers
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let u = ((lat2 - lat1) / 2.0).sin();
    let v = ((b.lon - a.lon).to_radians() / 2.0).sin();
    // rounding can push h just past 1 for antipodal points
    let h = (u * u + lat1.cos() * lat2.cos() * v * v).min(1.0);
    2.0 * EARTH_RADIUS_IN_METERS * h.sqrt().asin() / 1000.0
}
