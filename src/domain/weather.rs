use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Geographic location with the timezone schedules are written in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Tz,
}

/// Availability of the weather data feeding schedule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    /// Last fetch succeeded within the refresh interval.
    Online,
    /// Live fetch failed but a sufficiently fresh cached forecast is in use.
    DegradedUsingCache,
    /// No live data and no fresh cache. Weather-gated conditions fail closed.
    Offline,
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceState::Online => write!(f, "online"),
            SourceState::DegradedUsingCache => write!(f, "degraded_using_cache"),
            SourceState::Offline => write!(f, "offline"),
        }
    }
}

/// One hour of forecast data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature_f: f64,
    pub precipitation_probability: f64,
}

/// Immutable best-effort weather reading used for one evaluation cycle.
///
/// `current_temperature_f` and `precipitation_active` are both `None` when
/// the source is [`SourceState::Offline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub source_state: SourceState,
    pub current_temperature_f: Option<f64>,
    pub precipitation_active: Option<bool>,
    pub hourly_forecast: Vec<ForecastPoint>,
}

/// Probability at or above which a forecast point counts as active precipitation.
pub const PRECIPITATION_ACTIVE_THRESHOLD: f64 = 50.0;

impl WeatherSnapshot {
    /// Snapshot with no usable data at all.
    pub fn offline(now: DateTime<Utc>) -> Self {
        Self {
            fetched_at: now,
            source_state: SourceState::Offline,
            current_temperature_f: None,
            precipitation_active: None,
            hourly_forecast: Vec::new(),
        }
    }

    /// Build a snapshot from an hourly forecast, deriving the current
    /// conditions from the point covering `now` (the latest point not after
    /// `now`, or the first point when the forecast starts in the future).
    pub fn from_forecast(
        fetched_at: DateTime<Utc>,
        source_state: SourceState,
        now: DateTime<Utc>,
        hourly_forecast: Vec<ForecastPoint>,
    ) -> Self {
        let current = hourly_forecast
            .iter()
            .rev()
            .find(|p| p.timestamp <= now)
            .or_else(|| hourly_forecast.first());
        Self {
            fetched_at,
            source_state,
            current_temperature_f: current.map(|p| p.temperature_f),
            precipitation_active: current
                .map(|p| p.precipitation_probability >= PRECIPITATION_ACTIVE_THRESHOLD),
            hourly_forecast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn point(hour: u32, temp: f64, precip: f64) -> ForecastPoint {
        ForecastPoint {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap(),
            temperature_f: temp,
            precipitation_probability: precip,
        }
    }

    #[test]
    fn test_offline_snapshot_has_no_data() {
        let snap = WeatherSnapshot::offline(Utc::now());
        assert_eq!(snap.source_state, SourceState::Offline);
        assert!(snap.current_temperature_f.is_none());
        assert!(snap.precipitation_active.is_none());
        assert!(snap.hourly_forecast.is_empty());
    }

    #[test]
    fn test_current_conditions_from_covering_point() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 7, 30, 0).unwrap();
        let snap = WeatherSnapshot::from_forecast(
            now,
            SourceState::Online,
            now,
            vec![point(6, 28.0, 10.0), point(7, 30.0, 80.0), point(8, 33.0, 20.0)],
        );
        assert_eq!(snap.current_temperature_f, Some(30.0));
        assert_eq!(snap.precipitation_active, Some(true));
    }

    #[test]
    fn test_forecast_starting_in_future_uses_first_point() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 5, 0, 0).unwrap();
        let snap = WeatherSnapshot::from_forecast(
            now,
            SourceState::DegradedUsingCache,
            now,
            vec![point(6, 28.0, 10.0)],
        );
        assert_eq!(snap.current_temperature_f, Some(28.0));
        assert_eq!(snap.precipitation_active, Some(false));
    }
}
