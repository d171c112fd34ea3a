use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClockError;
use crate::source::{HttpDateSource, JsonEpochSource, TimeSource};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSourceKind {
    #[default]
    HttpDate,
    JsonEpoch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub time_url: String,
    pub source: TimeSourceKind,
    /// Field name or JSON pointer holding the epoch for `json_epoch` sources.
    pub json_field: String,
    pub interval_ms: u64,
    pub threshold_ms: i64,
    pub request_timeout_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            time_url: "https://www.google.com".to_string(),
            source: TimeSourceKind::HttpDate,
            json_field: "unixtime".to_string(),
            interval_ms: 60_000,
            threshold_ms: 500,
            request_timeout_ms: 5_000,
        }
    }
}

impl ClockConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), ClockError> {
        if self.time_url.trim().is_empty() {
            return Err(ClockError::Config("time_url must not be empty".into()));
        }
        if self.threshold_ms < 0 {
            return Err(ClockError::Config("threshold_ms must be >= 0".into()));
        }
        if self.interval_ms == 0 {
            return Err(ClockError::Config("interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn build_source(&self) -> Result<Arc<dyn TimeSource>, ClockError> {
        self.validate()?;
        let timeout = Duration::from_millis(self.request_timeout_ms);
        let source: Arc<dyn TimeSource> = match self.source {
            TimeSourceKind::HttpDate => Arc::new(HttpDateSource::new(&self.time_url, timeout)?),
            TimeSourceKind::JsonEpoch => Arc::new(JsonEpochSource::new(
                &self.time_url,
                &self.json_field,
                timeout,
            )?),
        };
        Ok(source)
    }
}
