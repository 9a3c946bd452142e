//! CSV ingestion for the facility dataset

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use tracing::debug;

use super::{CatalogError, Facility};

/// Read facilities from a CSV file with a header row.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Facility>, CatalogError> {
    let file = File::open(path.as_ref())?;
    read_facilities(file)
}

/// Rows without any positive coordinate are skipped; short rows leave the
/// missing columns empty.
pub fn read_facilities<R: Read>(reader: R) -> Result<Vec<Facility>, CatalogError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut facilities = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let facility = from_record(&record?);
        if facility.latitude > 0.0 || facility.longitude > 0.0 {
            facilities.push(facility);
        } else {
            skipped += 1;
        }
    }
    debug!(loaded = facilities.len(), skipped, "read facility csv");
    Ok(facilities)
}

fn from_record(record: &StringRecord) -> Facility {
    let text = |i: usize| record.get(i).unwrap_or_default().to_string();
    let number = |i: usize| record.get(i).and_then(|s| s.trim().parse().ok()).unwrap_or(0.0);

    Facility {
        location_id: text(0),
        applicant: text(1),
        facility_type: text(2),
        cnn: text(3),
        location_description: text(4),
        address: text(5),
        block_lot: text(6),
        block: text(7),
        lot: text(8),
        permit: text(9),
        status: text(10),
        food_items: text(11),
        x: number(12),
        y: number(13),
        latitude: number(14),
        longitude: number(15),
        schedule: text(16),
        days_hours: text(17),
        noi_sent: text(18),
        approved: text(19),
        received: text(20),
        prior_permit: text(21),
        expiration_date: text(22),
        location: text(23),
        fire_prevention_districts: text(24),
        police_districts: text(25),
        supervisor_districts: text(26),
        zip_codes: text(27),
        neighborhoods_old: text(28),
    }
}
