use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::Schedule;

/// A named collection of outlets controlled as a unit, with its ordered
/// schedule list and group-default safety limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutletGroup {
    pub name: String,
    /// Reference understood by the device-control collaborator.
    pub device: String,
    /// Outlet indices on that device switched together.
    pub outlets: Vec<u8>,
    pub max_runtime_hours: f64,
    pub cooldown_minutes: i64,
    pub schedules: Vec<Schedule>,
}

/// Safety-limit bookkeeping for one group. Mutated only by the automation
/// loop after a cycle's decisions are applied; persisted across restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupRuntimeState {
    /// Set on the OFF -> ON transition, cleared on ON -> OFF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_on_since: Option<DateTime<Utc>>,
    /// Set when a max-runtime forced OFF occurs; no new ON before this time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl GroupRuntimeState {
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    pub fn continuous_on_duration(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.current_on_since.map(|since| now - since)
    }
}

/// A time-bounded manual request overriding the schedule-derived desired
/// state. Still subject to the safety limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub desired_on: bool,
    pub expires_at: DateTime<Utc>,
}

impl ManualOverride {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
