use serde::{Deserialize, Serialize};
use std::fmt;

/// A forecast query point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.latitude, self.longitude)
    }
}

/// Locations used when the configuration doesn't list any
pub fn default_locations() -> Vec<Location> {
    vec![
        Location::new("Medellin", 6.2518, -75.5636),
        Location::new("Bogota", 4.6097, -74.0817),
        Location::new("Cali", 3.4372, -76.5225),
    ]
}
