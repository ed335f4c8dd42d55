//! Pure schedule evaluation: a point in time plus a weather snapshot in, a
//! desired boolean state plus a human-readable reason out. No I/O, no clocks.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::domain::{
    GeoLocation, ManualOverride, OutletGroup, Schedule, ScheduleTime, SolarAnchor, WeatherSnapshot,
};
use crate::solar::{local_instant, SolarCalculator};

use super::hours_to_duration;

/// Outcome of one group evaluation.
#[derive(Debug, Clone)]
pub struct Decision<'a> {
    pub desired_on: bool,
    pub reason: String,
    pub matched: Option<&'a Schedule>,
}

impl Decision<'_> {
    fn off(reason: impl Into<String>) -> Self {
        Decision {
            desired_on: false,
            reason: reason.into(),
            matched: None,
        }
    }
}

/// Evaluate a group's schedules at `now`.
///
/// Active schedules whose conditions hold compete on priority; equal
/// priorities resolve to the earlier-declared schedule. This declaration-order
/// tie-break is deliberate, not an error condition. A manual override, when
/// present and unexpired, replaces the schedule-derived result; the safety
/// limiter still has the final word either way.
pub fn evaluate<'a>(
    now: DateTime<Utc>,
    group: &'a OutletGroup,
    location: &GeoLocation,
    solar: &SolarCalculator,
    snapshot: &WeatherSnapshot,
    manual: Option<&ManualOverride>,
) -> Decision<'a> {
    let local_now = now.with_timezone(&location.timezone);
    let today = local_now.date_naive();
    let yesterday = today.pred_opt().unwrap_or(today);

    // Step 1: schedules whose resolved window contains `now`. A window
    // anchored yesterday can still be active past midnight.
    let mut active: Vec<&Schedule> = Vec::new();
    for schedule in group.schedules.iter().filter(|s| s.enabled) {
        let in_window = [yesterday, today].into_iter().any(|date| {
            schedule.applies_on(date.weekday().into())
                && resolve_window(schedule, date, location, solar)
                    .is_some_and(|(on, off)| now >= on && now < off)
        });
        if in_window {
            active.push(schedule);
        }
    }

    // Step 2: drop active schedules whose weather conditions do not hold.
    let mut satisfied: Vec<&Schedule> = Vec::new();
    let mut first_unsatisfied: Option<String> = None;
    for schedule in active {
        match check_conditions(schedule, snapshot) {
            Ok(()) => satisfied.push(schedule),
            Err(why) => {
                first_unsatisfied.get_or_insert_with(|| {
                    format!("schedule '{}' condition not satisfied: {why}", schedule.name)
                });
            }
        }
    }

    // Manual overrides are consulted ahead of step 3 and replace the
    // schedule-derived desired state entirely.
    if let Some(ov) = manual.filter(|ov| ov.is_active(now)) {
        return Decision {
            desired_on: ov.desired_on,
            reason: "manual override active".to_string(),
            matched: None,
        };
    }

    // Steps 3-4: default OFF, else highest priority with declaration-order
    // tie-break.
    match select_winner(&satisfied) {
        Some(winner) => Decision {
            desired_on: true,
            reason: format!("schedule '{}' active", winner.name),
            matched: Some(winner),
        },
        None => match first_unsatisfied {
            Some(reason) => Decision::off(reason),
            None => Decision::off("no active schedule"),
        },
    }
}

fn select_winner<'a>(satisfied: &[&'a Schedule]) -> Option<&'a Schedule> {
    let mut winner: Option<&Schedule> = None;
    for schedule in satisfied {
        match winner {
            Some(current) if schedule.priority <= current.priority => {}
            _ => winner = Some(schedule),
        }
    }
    winner
}

/// Resolve a schedule's on/off window anchored on `date`.
///
/// Fixed off times at or before the on time wrap to the next day; duration
/// off times extend from the resolved on instant.
pub fn resolve_window(
    schedule: &Schedule,
    date: NaiveDate,
    location: &GeoLocation,
    solar: &SolarCalculator,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let on = resolve_instant(&schedule.on_time, date, location, solar)?;
    let off = match &schedule.off_time {
        ScheduleTime::Duration { hours } => on + hours_to_duration(*hours),
        other => {
            let mut instant = resolve_instant(other, date, location, solar)?;
            if instant <= on {
                instant += chrono::Duration::days(1);
            }
            instant
        }
    };
    Some((on, off))
}

fn resolve_instant(
    time: &ScheduleTime,
    date: NaiveDate,
    location: &GeoLocation,
    solar: &SolarCalculator,
) -> Option<DateTime<Utc>> {
    match time {
        ScheduleTime::Fixed { time } => Some(local_instant(date, *time, location)),
        ScheduleTime::Solar {
            anchor,
            offset_minutes,
            fallback,
        } => {
            let (sunrise, sunset) = solar.solar_events(date, location);
            let base = match anchor {
                SolarAnchor::Sunrise => sunrise,
                SolarAnchor::Sunset => sunset,
            };
            Some(match base {
                Some(instant) => instant + chrono::Duration::minutes(*offset_minutes),
                // Calculation failure: the schedule's own fallback, without
                // the offset (the fallback already names the wanted time).
                None => local_instant(date, *fallback, location),
            })
        }
        ScheduleTime::Duration { .. } => None,
    }
}

/// Check a schedule's weather conditions against the snapshot. A condition
/// that cannot be verified (no data) fails closed.
fn check_conditions(schedule: &Schedule, snapshot: &WeatherSnapshot) -> Result<(), String> {
    let Some(conditions) = &schedule.conditions else {
        return Ok(());
    };
    if let Some(limit) = conditions.max_temperature_f {
        match snapshot.current_temperature_f {
            None => return Err("weather data unavailable".to_string()),
            Some(temp) if temp > limit => {
                return Err(format!("temperature {temp:.1}F above limit {limit:.1}F"));
            }
            Some(_) => {}
        }
    }
    if conditions.requires_precipitation {
        match snapshot.precipitation_active {
            Some(true) => {}
            Some(false) => return Err("no precipitation".to_string()),
            None => return Err("weather data unavailable".to_string()),
        }
    }
    Ok(())
}
