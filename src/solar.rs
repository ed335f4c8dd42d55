//! Sunrise/sunset calculation for solar-anchored schedule times.
//!
//! Implements the standard sunrise equation (zenith 90.833 degrees, refraction
//! included). Extreme latitudes where the sun never rises or sets on a given
//! date have no solution; [`SolarCalculator::solar_events`] reports that with
//! `None` so callers can substitute their own fallback, while
//! [`SolarCalculator::sunrise_sunset`] fills in the configured fallback pair
//! and never fails.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::domain::GeoLocation;

/// Official zenith, in degrees: 90 deg 50' accounts for atmospheric refraction
/// and the solar disc radius.
const ZENITH_DEG: f64 = 90.833;

#[derive(Debug, Clone, PartialEq)]
struct CachedDay {
    date: NaiveDate,
    latitude: f64,
    longitude: f64,
    sunrise: Option<DateTime<Utc>>,
    sunset: Option<DateTime<Utc>>,
}

/// Deterministic sunrise/sunset calculator with a one-day memo.
pub struct SolarCalculator {
    fallback_sunrise: NaiveTime,
    fallback_sunset: NaiveTime,
    cache: Mutex<Option<CachedDay>>,
}

impl SolarCalculator {
    pub fn new(fallback_sunrise: NaiveTime, fallback_sunset: NaiveTime) -> Self {
        Self {
            fallback_sunrise,
            fallback_sunset,
            cache: Mutex::new(None),
        }
    }

    /// Raw sunrise/sunset instants for the given local calendar date; either
    /// is `None` when the equation has no solution (polar day or night).
    pub fn solar_events(
        &self,
        date: NaiveDate,
        location: &GeoLocation,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        {
            let cache = self.cache.lock();
            if let Some(c) = cache.as_ref() {
                if c.date == date
                    && c.latitude == location.latitude
                    && c.longitude == location.longitude
                {
                    return (c.sunrise, c.sunset);
                }
            }
        }

        let sunrise = solar_event(date, location.latitude, location.longitude, true);
        let sunset = solar_event(date, location.latitude, location.longitude, false);
        if sunrise.is_none() || sunset.is_none() {
            debug!(%date, latitude = location.latitude, "no solar solution for date");
        }

        *self.cache.lock() = Some(CachedDay {
            date,
            latitude: location.latitude,
            longitude: location.longitude,
            sunrise,
            sunset,
        });
        (sunrise, sunset)
    }

    /// Like [`Self::solar_events`] but never fails: missing solutions are
    /// replaced with the configured fallback wall-clock times.
    pub fn sunrise_sunset(
        &self,
        date: NaiveDate,
        location: &GeoLocation,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let (sunrise, sunset) = self.solar_events(date, location);
        (
            sunrise.unwrap_or_else(|| local_instant(date, self.fallback_sunrise, location)),
            sunset.unwrap_or_else(|| local_instant(date, self.fallback_sunset, location)),
        )
    }
}

/// Resolve a wall-clock time on a date in the location's timezone to UTC.
/// DST gaps resolve to one hour later; ambiguous times take the earlier side.
pub fn local_instant(date: NaiveDate, time: NaiveTime, location: &GeoLocation) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match location.timezone.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        None => {
            let shifted = naive + chrono::Duration::hours(1);
            location
                .timezone
                .from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}

/// Sunrise equation for one event on one date. Returns `None` when the sun
/// never crosses the zenith on that date at that latitude.
fn solar_event(
    date: NaiveDate,
    latitude: f64,
    longitude: f64,
    sunrise: bool,
) -> Option<DateTime<Utc>> {
    let day_of_year = f64::from(date.ordinal());
    let lng_hour = longitude / 15.0;

    let approx = if sunrise {
        day_of_year + ((6.0 - lng_hour) / 24.0)
    } else {
        day_of_year + ((18.0 - lng_hour) / 24.0)
    };

    // Sun's mean anomaly and true longitude, degrees.
    let mean_anomaly = 0.9856 * approx - 3.289;
    let true_long = normalize_degrees(
        mean_anomaly
            + 1.916 * mean_anomaly.to_radians().sin()
            + 0.020 * (2.0 * mean_anomaly).to_radians().sin()
            + 282.634,
    );

    // Right ascension, adjusted into the same quadrant as the true longitude.
    let mut right_ascension =
        normalize_degrees((0.91764 * true_long.to_radians().tan()).atan().to_degrees());
    let long_quadrant = (true_long / 90.0).floor() * 90.0;
    let ra_quadrant = (right_ascension / 90.0).floor() * 90.0;
    right_ascension = (right_ascension + (long_quadrant - ra_quadrant)) / 15.0;

    let sin_declination = 0.39782 * true_long.to_radians().sin();
    let cos_declination = sin_declination.asin().cos();

    let cos_hour_angle = (ZENITH_DEG.to_radians().cos()
        - sin_declination * latitude.to_radians().sin())
        / (cos_declination * latitude.to_radians().cos());
    if !(-1.0..=1.0).contains(&cos_hour_angle) {
        return None;
    }

    let hour_angle = if sunrise {
        (360.0 - cos_hour_angle.acos().to_degrees()) / 15.0
    } else {
        cos_hour_angle.acos().to_degrees() / 15.0
    };

    let local_mean = hour_angle + right_ascension - 0.06571 * approx - 6.622;
    let ut_hours = (local_mean - lng_hour).rem_euclid(24.0);

    let secs = (ut_hours * 3600.0).round() as u32;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs.min(86_399), 0)?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

fn normalize_degrees(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}
