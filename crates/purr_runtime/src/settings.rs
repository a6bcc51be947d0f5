//! Runtime settings

use anyhow::{Context, Result};
use purr_core::math::Vector3;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for one `purr` run, read from a JSON file.
///
/// Every field is optional in the file; missing ones take the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub frames: u32,
    pub tick_rate_hz: u32,
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub log_level: String,
    /// JS module to load; the bundled demo script when unset.
    pub script_path: Option<PathBuf>,
    pub memory_limit_bytes: Option<usize>,
    pub entities: Vec<EntitySettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySettings {
    pub name: String,
    #[serde(default)]
    pub position: Vector3,
    #[serde(default)]
    pub scripts: Vec<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            frames: 180,
            tick_rate_hz: purr_core::time::TICK_RATE_HZ,
            log_level: "info".to_string(),
            script_path: None,
            memory_limit_bytes: Some(32 * 1024 * 1024),
            entities: vec![
                EntitySettings {
                    name: "Player".to_string(),
                    position: Vector3::ZERO,
                    scripts: vec!["Player".to_string()],
                },
                EntitySettings {
                    name: "Drone".to_string(),
                    position: Vector3::new(0.0, 2.0, 0.0),
                    scripts: vec!["Bobber".to_string()],
                },
            ],
        }
    }
}

impl RuntimeSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing settings in {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parsed log level, falling back to `info` for unknown names.
    pub fn level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}
