//! Offset tracking between the local clock and a trusted network time source.

pub mod config;
pub mod error;
pub mod metrics;
pub mod source;
pub mod sync;

pub use config::{ClockConfig, TimeSourceKind};
pub use error::ClockError;
pub use source::{HttpDateSource, JsonEpochSource, TimeSource};
pub use sync::{ClockEvent, ClockStatus, ClockSync, ClockView, StaticClock};
