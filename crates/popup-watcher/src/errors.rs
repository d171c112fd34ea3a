use browser_driver::DriverError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PopupError {
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("invalid popup pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("page subscription ended unexpectedly")]
    SubscriptionClosed,

    #[error("popup wait cancelled")]
    Cancelled,
}
