//! Mobile food facility permit record

use serde::{Deserialize, Serialize};

use crate::backend::Coordinate;

/// One row of the facility permit dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Facility {
    #[serde(rename = "locationID")]
    pub location_id: String,
    pub applicant: String,
    pub facility_type: String,
    pub cnn: String,
    pub location_description: String,
    pub address: String,
    pub block_lot: String,
    pub block: String,
    pub lot: String,
    pub permit: String,
    pub status: String,
    /// Colon separated list, e.g. `Tacos: Burritos: Quesadillas`
    pub food_items: String,
    pub x: f64,
    pub y: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub schedule: String,
    pub days_hours: String,
    #[serde(rename = "NOISent")]
    pub noi_sent: String,
    pub approved: String,
    pub received: String,
    pub prior_permit: String,
    pub expiration_date: String,
    pub location: String,
    pub fire_prevention_districts: String,
    pub police_districts: String,
    pub supervisor_districts: String,
    pub zip_codes: String,
    pub neighborhoods_old: String,
}

crate::json_codec!(Facility);

impl Facility {
    pub fn key(&self) -> String {
        self.location_id.clone()
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Food items served, trimmed, empty entries dropped
    pub fn food_items(&self) -> impl Iterator<Item = &str> {
        self.food_items
            .split(':')
            .map(str::trim)
            .filter(|item| !item.is_empty())
    }
}
