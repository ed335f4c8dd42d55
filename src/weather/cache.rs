//! Durable snapshot of the last successful forecast fetch.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ForecastPoint, GeoLocation};

/// Locations closer than this (degrees, ~11 m) count as the same place.
const LOCATION_EPSILON_DEG: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherCache {
    pub fetched_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub forecast: Vec<ForecastPoint>,
}

impl WeatherCache {
    pub fn new(fetched_at: DateTime<Utc>, location: &GeoLocation, forecast: Vec<ForecastPoint>) -> Self {
        Self {
            fetched_at,
            latitude: location.latitude,
            longitude: location.longitude,
            forecast,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, cache_valid_hours: i64) -> bool {
        self.age(now) < Duration::hours(cache_valid_hours)
    }

    /// A cached forecast for a different location must not be served.
    pub fn matches_location(&self, location: &GeoLocation) -> bool {
        (self.latitude - location.latitude).abs() < LOCATION_EPSILON_DEG
            && (self.longitude - location.longitude).abs() < LOCATION_EPSILON_DEG
    }

    pub fn usable(&self, location: &GeoLocation, now: DateTime<Utc>, cache_valid_hours: i64) -> bool {
        self.matches_location(location) && self.is_fresh(now, cache_valid_hours)
    }
}
