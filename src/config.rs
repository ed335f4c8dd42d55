use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::domain::{GeoLocation, OutletGroup, Schedule};
use crate::weather::ResilienceTuning;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub location: LocationConfig,
    pub weather: WeatherConfig,
    pub automation: AutomationConfig,
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// IANA timezone name, e.g. "America/New_York".
    pub timezone: String,
}

impl LocationConfig {
    pub fn geo(&self) -> Result<GeoLocation> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            bail!("latitude {} out of range", self.latitude);
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            bail!("longitude {} out of range", self.longitude);
        }
        let timezone = self
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid timezone '{}': {e}", self.timezone))?;
        Ok(GeoLocation {
            latitude: self.latitude,
            longitude: self.longitude,
            timezone,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
    pub base_url: String,
    pub fetch_timeout_seconds: u64,
    #[serde(flatten)]
    pub tuning: ResilienceTuning,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    pub device_io_timeout_seconds: u64,
    pub bridge_wait_timeout_seconds: u64,
    pub fallback_sunrise: NaiveTime,
    pub fallback_sunset: NaiveTime,
    pub default_max_runtime_hours: f64,
    pub default_cooldown_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub device: String,
    pub outlets: Vec<u8>,
    #[serde(default)]
    pub max_runtime_hours: Option<f64>,
    #[serde(default)]
    pub cooldown_minutes: Option<i64>,
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("OOC__").split("__"));
        Ok(figment.extract()?)
    }

    /// Turn group configs into domain groups, rejecting invariant violations
    /// (duplicate names, malformed schedules) before the engine ever runs.
    pub fn resolve_groups(&self) -> Result<Vec<OutletGroup>> {
        let mut names = HashSet::new();
        let mut groups = Vec::with_capacity(self.groups.len());
        for gc in &self.groups {
            if !names.insert(gc.name.as_str()) {
                bail!("duplicate group name '{}'", gc.name);
            }
            if gc.outlets.is_empty() {
                bail!("group '{}' controls no outlets", gc.name);
            }
            let mut schedule_names = HashSet::new();
            for schedule in &gc.schedules {
                schedule
                    .validate()
                    .with_context(|| format!("group '{}'", gc.name))?;
                if !schedule_names.insert(schedule.name.as_str()) {
                    bail!(
                        "group '{}': duplicate schedule name '{}'",
                        gc.name,
                        schedule.name
                    );
                }
            }
            groups.push(OutletGroup {
                name: gc.name.clone(),
                device: gc.device.clone(),
                outlets: gc.outlets.clone(),
                max_runtime_hours: gc
                    .max_runtime_hours
                    .unwrap_or(self.automation.default_max_runtime_hours),
                cooldown_minutes: gc
                    .cooldown_minutes
                    .unwrap_or(self.automation.default_cooldown_minutes),
                schedules: gc.schedules.clone(),
            });
        }
        Ok(groups)
    }
}
