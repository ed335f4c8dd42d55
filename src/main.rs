use anyhow::Result;
use open_outlet_controller::{config::Config, engine, telemetry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cfg = Config::load()?;
    if cfg.groups.is_empty() {
        warn!("no outlet groups configured, nothing will be controlled");
    }

    let (state, automation) = engine::build(cfg).await?;
    info!(
        groups = state.cfg.groups.len(),
        "starting Open Outlet Controller"
    );
    engine::spawn_automation_tasks(&state, automation);

    telemetry::shutdown_signal().await;
    warn!("shutdown complete");
    Ok(())
}
