use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Upper bound on how long `stop` may take to be observed.
    pub cancel_poll_ms: u64,
    pub pacing_min_ms: u64,
    pub pacing_max_ms: u64,
    pub navigation_attempts: u32,
    pub navigation_timeout_ms: u64,
    pub load_timeout_ms: u64,
    pub maintain_interval_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            cancel_poll_ms: 1_000,
            pacing_min_ms: 150,
            pacing_max_ms: 600,
            navigation_attempts: 3,
            navigation_timeout_ms: 30_000,
            load_timeout_ms: 15_000,
            maintain_interval_ms: 60_000,
        }
    }
}

impl ProcessConfig {
    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms.max(1))
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn maintain_interval(&self) -> Duration {
        Duration::from_millis(self.maintain_interval_ms.max(1))
    }

    /// Test-friendly settings: no pacing, short timeouts.
    pub fn fast() -> Self {
        Self {
            cancel_poll_ms: 50,
            pacing_min_ms: 0,
            pacing_max_ms: 0,
            navigation_attempts: 3,
            navigation_timeout_ms: 500,
            load_timeout_ms: 500,
            maintain_interval_ms: 50,
        }
    }
}
