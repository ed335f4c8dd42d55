//! Runtime safety limits: maximum continuous-ON duration and mandatory
//! cooldown. A safety-forced OFF is a first-class decision outcome, not an
//! error.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::domain::{GroupRuntimeState, OutletGroup, Schedule};

use super::evaluator::Decision;
use super::hours_to_duration;

pub struct SafetyLimiter;

impl SafetyLimiter {
    /// Apply the group's safety limits to a schedule decision. Has the final
    /// word: a cooldown in progress or an exceeded runtime forces OFF
    /// regardless of what the schedules (or a manual override) wanted.
    pub fn enforce<'a>(
        &self,
        group: &OutletGroup,
        decision: Decision<'a>,
        runtime: &mut GroupRuntimeState,
        now: DateTime<Utc>,
    ) -> Decision<'a> {
        if runtime.in_cooldown(now) {
            return Decision {
                desired_on: false,
                reason: "cooldown active".to_string(),
                matched: decision.matched,
            };
        }
        // Expired cooldowns are cleared so persisted state stays tidy.
        if runtime.cooldown_until.is_some() {
            runtime.cooldown_until = None;
        }

        if decision.desired_on {
            let (max_runtime_hours, cooldown_minutes) =
                effective_limits(group, decision.matched);
            if let Some(on_for) = runtime.continuous_on_duration(now) {
                if on_for >= hours_to_duration(max_runtime_hours) {
                    runtime.cooldown_until =
                        Some(now + chrono::Duration::minutes(cooldown_minutes));
                    warn!(
                        group = %group.name,
                        on_for_minutes = on_for.num_minutes(),
                        max_runtime_hours,
                        cooldown_minutes,
                        "max runtime exceeded, forcing off"
                    );
                    return Decision {
                        desired_on: false,
                        reason: "max runtime exceeded".to_string(),
                        matched: decision.matched,
                    };
                }
            }
        }
        decision
    }
}

/// Per-schedule safety overrides take precedence field by field over the
/// group defaults.
fn effective_limits(group: &OutletGroup, matched: Option<&Schedule>) -> (f64, i64) {
    let override_ = matched.and_then(|s| s.safety_override.as_ref());
    (
        override_
            .and_then(|o| o.max_runtime_hours)
            .unwrap_or(group.max_runtime_hours),
        override_
            .and_then(|o| o.cooldown_minutes)
            .unwrap_or(group.cooldown_minutes),
    )
}
