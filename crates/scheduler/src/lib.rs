//! Computes trigger instants and fires them once per period against the network-corrected clock.

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod plan;
pub mod rule;
pub mod trigger;

pub use config::{RuleKind, TriggerConfig};
pub use error::SchedulerError;
pub use model::{TriggerEvent, TriggerFire, TriggerParams};
pub use plan::{plan, PlanStep};
pub use rule::{upcoming, DailyAt, MonthRollover, Once, TriggerRule};
pub use trigger::{TriggerCallback, TriggerScheduler};
