//! JSON file persistence for the weather cache and per-group runtime state.
//!
//! Missing or corrupt files degrade to empty state with a warning; startup
//! never aborts on persistence problems.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::domain::GroupRuntimeState;
use crate::weather::WeatherCache;

const WEATHER_CACHE_FILE: &str = "weather_cache.json";
const RUNTIME_STATE_FILE: &str = "runtime_state.json";

pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create state dir {}", self.dir.display()))
    }

    pub async fn load_weather_cache(&self) -> Option<WeatherCache> {
        self.load_json(WEATHER_CACHE_FILE).await
    }

    pub async fn save_weather_cache(&self, cache: &WeatherCache) -> Result<()> {
        self.save_json(WEATHER_CACHE_FILE, cache).await
    }

    pub async fn load_runtime_state(&self) -> HashMap<String, GroupRuntimeState> {
        self.load_json(RUNTIME_STATE_FILE).await.unwrap_or_default()
    }

    pub async fn save_runtime_state(
        &self,
        state: &HashMap<String, GroupRuntimeState>,
    ) -> Result<()> {
        self.save_json(RUNTIME_STATE_FILE, state).await
    }

    async fn load_json<T: DeserializeOwned>(&self, file: &str) -> Option<T> {
        let path = self.dir.join(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read state file");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt state file ignored");
                None
            }
        }
    }

    /// Write via a temp file and rename so a crash mid-write never leaves a
    /// truncated state file behind.
    async fn save_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{file}.tmp"));
        let json = serde_json::to_vec_pretty(value).context("state serialization failed")?;
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
