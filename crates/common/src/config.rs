use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::Sensitivity;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    pub directories: Vec<String>,
    pub latency_ms: u64,
    pub report_changes: bool,
    pub force_polling: bool,
    pub sensitivity: Sensitivity,
    pub ignore_dirs: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directories: vec![".".to_string()],
            latency_ms: 250,
            report_changes: true,
            force_polling: false,
            sensitivity: Sensitivity::High,
            ignore_dirs: Vec::new(),
        }
    }
}

impl WatchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading config file: {}", path.display()))?;
            toml::from_str::<Self>(&raw)
                .with_context(|| format!("failed parsing config file: {}", path.display()))?
        } else {
            Self::default()
        };

        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Applies `DIRWATCH_*` overrides looked up through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dirs) = var("DIRWATCH_DIRECTORIES") {
            self.directories = dirs
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        if let Some(latency) = var("DIRWATCH_LATENCY_MS") {
            match latency.parse() {
                Ok(ms) => self.latency_ms = ms,
                Err(_) => tracing::warn!(value = %latency, "ignoring invalid DIRWATCH_LATENCY_MS"),
            }
        }
        if let Some(polling) = var("DIRWATCH_FORCE_POLLING") {
            self.force_polling = polling.eq_ignore_ascii_case("true");
        }
        if let Some(report) = var("DIRWATCH_REPORT_CHANGES") {
            self.report_changes = !report.eq_ignore_ascii_case("false");
        }
        if let Some(raw) = var("DIRWATCH_SENSITIVITY") {
            self.sensitivity = raw
                .parse()
                .with_context(|| "invalid DIRWATCH_SENSITIVITY".to_string())?;
        }
        Ok(())
    }

    pub const fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}
