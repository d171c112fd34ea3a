use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;

/// Timing knobs applied by the scheduler loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerParams {
    /// Zone whose calendar decides what "the target day" is.
    pub tz: FixedOffset,
    /// Upper bound on any single sleep, so clock corrections are picked up.
    pub recheck_interval: Duration,
    /// When set, a `PreFire` event is published this long before the instant.
    pub refresh_lead: Option<Duration>,
    /// How late a wake-up may be and still fire.
    pub grace: Duration,
}

impl Default for TriggerParams {
    fn default() -> Self {
        Self {
            tz: Utc.fix(),
            recheck_interval: Duration::from_secs(1),
            refresh_lead: Some(Duration::from_secs(3)),
            grace: Duration::from_secs(5),
        }
    }
}

/// Delivered to the armed callback when an instant fires.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TriggerFire {
    pub target: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
    pub late_by_ms: i64,
    pub period: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerEvent {
    Armed { target: DateTime<Utc> },
    PreFire { target: DateTime<Utc> },
    Fired(TriggerFire),
    Missed { target: DateTime<Utc>, late_by_ms: i64 },
}

impl TriggerEvent {
    pub fn target(&self) -> DateTime<Utc> {
        match self {
            TriggerEvent::Armed { target }
            | TriggerEvent::PreFire { target }
            | TriggerEvent::Missed { target, .. } => *target,
            TriggerEvent::Fired(fire) => fire.target,
        }
    }
}
