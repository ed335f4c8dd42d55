pub mod evaluator;
pub mod runner;
pub mod safety;

pub use evaluator::{evaluate, Decision};
pub use runner::{AutomationLoop, ManualControl};
pub use safety::SafetyLimiter;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::bridge::ExecutionBridge;
use crate::config::Config;
use crate::devices::OutletController;
use crate::events::EventBus;
use crate::persist::StateStore;
use crate::solar::SolarCalculator;
use crate::weather::{OpenMeteoClient, WeatherResilienceService};

pub(crate) fn hours_to_duration(hours: f64) -> chrono::Duration {
    chrono::Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}

/// Shared handles for everything outside the automation loop itself.
#[derive(Clone)]
pub struct ControllerState {
    pub cfg: Config,
    pub bridge: Arc<ExecutionBridge>,
    pub events: EventBus,
    pub manual: ManualControl,
}

/// Wire up the full controller from configuration. The returned
/// [`AutomationLoop`] is consumed by [`spawn_automation_tasks`].
pub async fn build(cfg: Config) -> Result<(ControllerState, AutomationLoop)> {
    let location = cfg.location.geo()?;
    let groups = cfg.resolve_groups().context("invalid group configuration")?;

    let store = StateStore::new(&cfg.persistence.data_dir);
    store.ensure_dir().await?;
    let cached = store.load_weather_cache().await;

    let events = EventBus::default();
    let provider = OpenMeteoClient::new(
        cfg.weather.base_url.clone(),
        Duration::from_secs(cfg.weather.fetch_timeout_seconds),
    )?;
    let weather = WeatherResilienceService::new(
        Box::new(provider),
        location.clone(),
        cfg.weather.tuning.clone(),
        cached,
        events.clone(),
    );

    let solar = SolarCalculator::new(
        cfg.automation.fallback_sunrise,
        cfg.automation.fallback_sunset,
    );

    let bridge = Arc::new(ExecutionBridge::new(Duration::from_secs(
        cfg.automation.bridge_wait_timeout_seconds,
    )));
    let controller = device_controller();
    bridge
        .start(
            controller,
            Duration::from_secs(cfg.automation.device_io_timeout_seconds),
        )
        .context("execution context start failed")?;

    let automation = AutomationLoop::new(
        groups,
        location,
        solar,
        weather,
        bridge.clone(),
        store,
        events.clone(),
        cfg.weather.tuning.refresh_interval_minutes,
    );
    let manual = automation.manual_control();

    Ok((
        ControllerState {
            cfg,
            bridge,
            events,
            manual,
        },
        automation,
    ))
}

fn device_controller() -> Arc<dyn OutletController> {
    #[cfg(feature = "sim")]
    {
        info!("using simulated outlet bank");
        Arc::new(crate::devices::SimulatedOutletBank::new(
            Duration::from_millis(50),
        ))
    }
    #[cfg(not(feature = "sim"))]
    {
        warn!("no device protocol adapter compiled in, outlets will report unreachable");
        Arc::new(crate::devices::NoopOutletController)
    }
}

pub fn spawn_automation_tasks(state: &ControllerState, automation: AutomationLoop) {
    let mut events = state.events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "automation event");
        }
    });

    tokio::spawn(async move {
        if let Err(e) = automation.run().await {
            warn!(error = %e, "automation loop stopped");
        }
    });
}
