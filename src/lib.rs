//! Timegate CLI library
//!
//! Exposes configuration, wiring and the command implementations for integration testing.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod orchestrator;

pub use config::AppConfig;
pub use orchestrator::Orchestrator;
