//! Business logic services

pub mod geo;
pub mod geocoding;
pub mod nominatim;
pub mod planning;
pub mod routing;
