use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thicket_common::utils::config::load_config;
use thicket_common::utils::logging::LoggingConfig;
use thicket_storage::StorageConfig;

/// When the barrier runs a reorganization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierConfig {
    /// Signals tolerated before a pass runs immediately
    #[serde(default = "default_clearance")]
    pub clearance: u64,
    /// Quiet time after the first signal before a deferred pass runs
    #[serde(default = "default_quiet_period_ms")]
    pub quiet_period_ms: u64,
}

impl BarrierConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            clearance: default_clearance(),
            quiet_period_ms: default_quiet_period_ms(),
        }
    }
}

fn default_clearance() -> u64 { 500 }
fn default_quiet_period_ms() -> u64 { 500 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThicketConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub barrier: BarrierConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ThicketConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_config(path)
    }
}
