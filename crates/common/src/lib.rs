pub mod config;

use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How eagerly a polling backend should rescan a watched directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    #[default]
    High,
    Medium,
    Low,
}

impl Sensitivity {
    pub const fn poll_interval(self) -> Duration {
        match self {
            Self::High => Duration::from_secs(2),
            Self::Medium => Duration::from_secs(10),
            Self::Low => Duration::from_secs(30),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sensitivity `{0}`, expected one of: high, medium, low")]
pub struct ParseSensitivityError(String);

impl FromStr for Sensitivity {
    type Err = ParseSensitivityError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(ParseSensitivityError(raw.to_string())),
        }
    }
}

/// One drained batch of changed directories, as handed to consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeReport {
    pub unix_ms: u64,
    pub directories: Vec<String>,
}

impl ChangeReport {
    pub fn now(directories: Vec<String>) -> Self {
        Self {
            unix_ms: unix_now_ms(),
            directories,
        }
    }
}

pub fn unix_now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}
