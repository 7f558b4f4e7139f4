//! Waypoint model and coordinate validation.

use crate::model::ids::WaypointId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DECIMAL_COORDINATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?\d{1,3}(\.\d+)?$").expect("coordinate pattern is a valid regex")
});

/// Named geolocated point referenced by markers and links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: WaypointId,
    #[serde(default)]
    pub name: String,
    /// Decimal latitude string, `-90..=90`.
    pub lat: String,
    /// Decimal longitude string, `-180..=180`.
    #[serde(rename = "lng", alias = "lon")]
    pub lon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hardness: String,
}

impl Waypoint {
    pub fn new(
        id: impl Into<WaypointId>,
        name: impl Into<String>,
        lat: impl Into<String>,
        lon: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            lat: lat.into(),
            lon: lon.into(),
            comment: String::new(),
            hardness: String::new(),
        }
    }

    /// Returns the first coordinate that is not a valid decimal in range.
    pub fn invalid_coordinate(&self) -> Option<&str> {
        if !is_valid_coordinate(&self.lat, 90.0) {
            return Some(self.lat.as_str());
        }
        if !is_valid_coordinate(&self.lon, 180.0) {
            return Some(self.lon.as_str());
        }
        None
    }
}

fn is_valid_coordinate(value: &str, limit: f64) -> bool {
    let trimmed = value.trim();
    if !DECIMAL_COORDINATE.is_match(trimmed) {
        return false;
    }
    trimmed
        .parse::<f64>()
        .map(|parsed| parsed.abs() <= limit)
        .unwrap_or(false)
}
