//! Step execution error types

use action_locator::LocatorError;
use browser_driver::DriverError;
use thiserror::Error;

/// Step execution errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// No candidate resolved
    #[error("Locator error: {0}")]
    Locator(#[from] LocatorError),

    /// The driver rejected the interaction
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// A `${name}` placeholder had no value
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
}

impl FlowError {
    /// Check if another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::Locator(err) => err.is_retryable(),
            FlowError::Driver(err) => err.is_retryable(),
            FlowError::UnknownVariable(_) => false,
        }
    }
}
