//! Food Facility Catalog
//!
//! Demo domain built on the stores: facilities cached by location id,
//! indexed per food item and by position.

mod facility;
mod loader;
mod service;

pub use facility::Facility;
pub use loader::{load_csv, read_facilities};
pub use service::FacilityService;

use thiserror::Error;

use crate::error::CacheError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("facility {0} not found")]
    NotFound(String),
}
