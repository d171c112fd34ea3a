//! Per-target automation processes.
//!
//! [`ProcessRegistry`] owns one [`ProcessHandle`] per target and serialises
//! start/stop per key. Each process walks the reservation state machine on its
//! own task, publishing every transition to a [`timegate_event_bus::StatusSink`].

pub mod config;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod pacing;
pub mod process;
pub mod profile;
pub mod registry;

pub use config::ProcessConfig;
pub use errors::ProcessError;
pub use model::{ProcessSnapshot, StartAck, StopAck, StopOptions};
pub use process::ProcessHandle;
pub use profile::{
    Catalog, ExhaustionPolicy, KeepAlive, SiteProfile, Stage, StageScript, TargetConfig,
    VerificationSpec,
};
pub use registry::ProcessRegistry;
