//! Application configuration
//!
//! One YAML document with a section per subsystem. Every section falls back to
//! its defaults, so partial files are fine.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use timegate_clock::{ClockConfig, ClockError};
use timegate_process::{Catalog, ProcessConfig, ProcessError, SiteProfile, TargetConfig};
use timegate_scheduler::{SchedulerError, TriggerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("clock: {0}")]
    Clock(#[from] ClockError),

    #[error("trigger: {0}")]
    Trigger(#[from] SchedulerError),

    #[error("profiles: {0}")]
    Catalog(#[from] ProcessError),

    #[error("process: {0}")]
    Process(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// Directory for a daily-rolling log file, in addition to stderr.
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_dir: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// In-memory driver; every selector resolves.
    #[default]
    Stub,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub clock: ClockConfig,
    pub trigger: TriggerConfig,
    pub process: ProcessConfig,
    pub profiles: BTreeMap<String, SiteProfile>,
    pub targets: Vec<TargetConfig>,
    /// 0 disables the `/metrics` endpoint.
    pub metrics_port: u16,
    pub driver: DriverKind,
}

impl AppConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn catalog(&self) -> Catalog {
        Catalog {
            profiles: self.profiles.clone(),
            targets: self.targets.clone(),
        }
    }

    /// Checks every section without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock.validate()?;
        self.trigger.build_rule()?;
        self.trigger.params()?;
        if self.process.pacing_min_ms > self.process.pacing_max_ms {
            return Err(ConfigError::Process(
                "pacing_min_ms must not exceed pacing_max_ms".into(),
            ));
        }
        if self.process.navigation_attempts == 0 {
            return Err(ConfigError::Process(
                "navigation_attempts must be at least 1".into(),
            ));
        }
        self.catalog().validate()?;
        Ok(())
    }
}
