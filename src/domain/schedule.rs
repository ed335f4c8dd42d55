use anyhow::{bail, Result};
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Schedule priority. Higher priority wins when multiple schedules in the
/// same group would independently request ON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Solar anchor for schedule times derived from astronomical events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolarAnchor {
    Sunrise,
    Sunset,
}

/// Day of week for schedule day filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<Weekday> for DayOfWeek {
    fn from(w: Weekday) -> Self {
        match w {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// Either end of a schedule window.
///
/// `Duration` is only valid as an `off_time` and is resolved relative to the
/// matched `on_time` for the same day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleTime {
    Fixed {
        time: NaiveTime,
    },
    Solar {
        anchor: SolarAnchor,
        #[serde(default)]
        offset_minutes: i64,
        fallback: NaiveTime,
    },
    Duration {
        hours: f64,
    },
}

/// Weather conditions gating a schedule. A condition that cannot be checked
/// because weather data is unavailable counts as not satisfied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temperature_f: Option<f64>,
    #[serde(default)]
    pub requires_precipitation: bool,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.max_temperature_f.is_none() && !self.requires_precipitation
    }
}

/// Per-schedule runtime limits overriding the group defaults while this
/// schedule is the one in effect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runtime_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_minutes: Option<i64>,
}

/// One conditional on/off rule belonging to a group.
///
/// Declaration order within a group's schedule list is significant: it breaks
/// ties between equal-priority schedules that are active at the same instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: Priority,
    /// Empty means every day.
    #[serde(default)]
    pub days_of_week: Vec<DayOfWeek>,
    pub on_time: ScheduleTime,
    pub off_time: ScheduleTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_override: Option<SafetyOverride>,
}

fn default_enabled() -> bool {
    true
}

impl Schedule {
    /// Reject malformed schedules before they ever reach the evaluator.
    pub fn validate(&self) -> Result<()> {
        if let ScheduleTime::Duration { .. } = self.on_time {
            bail!(
                "schedule '{}': on_time cannot be a duration (no anchor to resolve against)",
                self.name
            );
        }
        if let ScheduleTime::Duration { hours } = self.off_time {
            if !hours.is_finite() || hours <= 0.0 {
                bail!(
                    "schedule '{}': duration off_time must be a positive number of hours",
                    self.name
                );
            }
        }
        if let ScheduleTime::Solar { offset_minutes, .. } = self.on_time {
            if offset_minutes.abs() > 24 * 60 {
                bail!(
                    "schedule '{}': solar offset {offset_minutes} minutes exceeds one day",
                    self.name
                );
            }
        }
        Ok(())
    }

    pub fn applies_on(&self, day: DayOfWeek) -> bool {
        self.days_of_week.is_empty() || self.days_of_week.contains(&day)
    }
}
