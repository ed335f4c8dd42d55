//! The periodic decision cycle: refresh weather, evaluate every group, apply
//! changed decisions through the execution bridge, persist runtime state.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeError, DeviceCommand, ExecutionBridge};
use crate::domain::{GeoLocation, GroupRuntimeState, ManualOverride, OutletGroup};
use crate::events::{AutomationEvent, EventBus};
use crate::persist::StateStore;
use crate::solar::SolarCalculator;
use crate::weather::WeatherResilienceService;

use super::evaluator;
use super::safety::SafetyLimiter;

type OverrideMap = Arc<RwLock<HashMap<String, ManualOverride>>>;

/// Thread-safe handle for manual control requests. Overrides are consulted by
/// the next evaluation cycle and remain subject to the safety limiter.
#[derive(Clone)]
pub struct ManualControl {
    overrides: OverrideMap,
}

impl ManualControl {
    pub async fn request_override(
        &self,
        group: &str,
        desired_on: bool,
        duration: chrono::Duration,
    ) {
        let expires_at = Utc::now() + duration;
        info!(group, desired_on, %expires_at, "manual override installed");
        self.overrides.write().await.insert(
            group.to_string(),
            ManualOverride {
                desired_on,
                expires_at,
            },
        );
    }

    pub async fn clear_override(&self, group: &str) {
        if self.overrides.write().await.remove(group).is_some() {
            info!(group, "manual override cleared");
        }
    }
}

pub struct AutomationLoop {
    groups: Vec<OutletGroup>,
    location: GeoLocation,
    solar: SolarCalculator,
    limiter: SafetyLimiter,
    weather: WeatherResilienceService,
    bridge: Arc<ExecutionBridge>,
    store: StateStore,
    events: EventBus,
    overrides: OverrideMap,
    runtime: HashMap<String, GroupRuntimeState>,
    /// Last state successfully applied per group; failed applies retry next
    /// cycle because this is only updated on success.
    last_applied: HashMap<String, bool>,
    cycle_interval_minutes: i64,
}

impl AutomationLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        groups: Vec<OutletGroup>,
        location: GeoLocation,
        solar: SolarCalculator,
        weather: WeatherResilienceService,
        bridge: Arc<ExecutionBridge>,
        store: StateStore,
        events: EventBus,
        cycle_interval_minutes: i64,
    ) -> Self {
        Self {
            groups,
            location,
            solar,
            limiter: SafetyLimiter,
            weather,
            bridge,
            store,
            events,
            overrides: Arc::new(RwLock::new(HashMap::new())),
            runtime: HashMap::new(),
            last_applied: HashMap::new(),
            cycle_interval_minutes,
        }
    }

    pub fn manual_control(&self) -> ManualControl {
        ManualControl {
            overrides: self.overrides.clone(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        self.runtime = self.store.load_runtime_state().await;
        info!(
            groups = self.groups.len(),
            interval_minutes = self.cycle_interval_minutes,
            "automation loop started"
        );
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            (self.cycle_interval_minutes.max(1) as u64) * 60,
        ));
        loop {
            interval.tick().await;
            self.cycle(Utc::now()).await;
        }
    }

    /// One full cycle. Weather failures never block evaluation; device-apply
    /// failures are isolated per group.
    pub async fn cycle(&mut self, now: DateTime<Utc>) {
        let cache_changed = self.weather.refresh(now).await;
        if cache_changed {
            if let Some(cache) = self.weather.cache() {
                if let Err(e) = self.store.save_weather_cache(cache).await {
                    warn!(error = %e, "failed to persist weather cache");
                }
            }
        }
        let snapshot = self.weather.snapshot(now);

        let overrides = {
            let mut map = self.overrides.write().await;
            map.retain(|_, ov| ov.is_active(now));
            map.clone()
        };

        for group in &self.groups {
            let runtime = self.runtime.entry(group.name.clone()).or_default();
            let decision = evaluator::evaluate(
                now,
                group,
                &self.location,
                &self.solar,
                &snapshot,
                overrides.get(&group.name),
            );
            let decision = self.limiter.enforce(group, decision, runtime, now);
            debug!(
                group = %group.name,
                desired_on = decision.desired_on,
                reason = %decision.reason,
                "group evaluated"
            );

            let previous = self.last_applied.get(&group.name).copied();
            if previous == Some(decision.desired_on) {
                continue;
            }
            match apply_outlets(&self.bridge, group, decision.desired_on).await {
                Ok(()) => {
                    info!(
                        group = %group.name,
                        on = decision.desired_on,
                        reason = %decision.reason,
                        "decision applied"
                    );
                    if decision.desired_on {
                        runtime.current_on_since.get_or_insert(now);
                    } else {
                        runtime.current_on_since = None;
                    }
                    self.events.publish(AutomationEvent::DecisionChanged {
                        group: group.name.clone(),
                        old_desired: previous.unwrap_or(false),
                        new_desired: decision.desired_on,
                        reason: decision.reason.clone(),
                    });
                    self.last_applied.insert(group.name.clone(), decision.desired_on);
                }
                Err(e) => {
                    warn!(
                        group = %group.name,
                        error = %e,
                        "device apply failed, retrying next cycle"
                    );
                }
            }
        }

        if let Err(e) = self.store.save_runtime_state(&self.runtime).await {
            warn!(error = %e, "failed to persist runtime state");
        }
    }
}

async fn apply_outlets(
    bridge: &ExecutionBridge,
    group: &OutletGroup,
    on: bool,
) -> Result<(), BridgeError> {
    for outlet in &group.outlets {
        bridge
            .submit_and_await(DeviceCommand::TurnOutlet {
                device: group.device.clone(),
                outlet: *outlet,
                on,
            })
            .await?;
    }
    Ok(())
}
