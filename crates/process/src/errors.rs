use browser_driver::DriverError;
use popup_watcher::PopupError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("session launch failed: {0}")]
    Launch(DriverError),

    #[error("navigation failed after {attempts} attempts: {last_error}")]
    Navigation { attempts: u32, last_error: String },

    #[error("{stage} stage failed: {reason}")]
    Stage { stage: String, reason: String },

    #[error("identity verification failed: {0}")]
    Verification(PopupError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("trigger scheduler stopped")]
    TriggerClosed,

    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    #[error("target '{target}' references unknown profile '{profile}'")]
    UnknownProfile { target: String, profile: String },

    #[error("invalid profile '{profile}': {reason}")]
    InvalidProfile { profile: String, reason: String },
}
