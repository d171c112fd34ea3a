//! Retry execution layer
//!
//! [`RetryExecutor`] runs an action a bounded number of times with per-try
//! timeouts, an optional recovery between tries, and cooperative cancellation.
//! [`StepRunner`] applies it to configured locate-and-act steps.

pub mod errors;
pub mod executor;
pub mod strategies;
pub mod types;

pub use errors::FlowError;
pub use executor::{RetryExecutor, StepRunner};
pub use strategies::{NoRecovery, Recovery, ReloadRecovery};
pub use types::{AttemptError, Interaction, RecoveryKind, RetryOutcome, RetryPolicy, StepSpec};
