//! Error types for locator system

use browser_driver::DriverError;
use thiserror::Error;

/// Locator error enumeration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocatorError {
    /// No candidate resolved to an interactable element
    #[error("Element not found: tried {tried}")]
    ElementNotFound { tried: String },

    /// The candidate list was empty
    #[error("No candidates configured")]
    NoCandidates,

    /// The driver failed on every candidate
    #[error("Driver error: {0}")]
    Driver(DriverError),
}

impl LocatorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LocatorError::ElementNotFound { .. } => true,
            LocatorError::NoCandidates => false,
            LocatorError::Driver(err) => err.is_retryable(),
        }
    }
}

impl From<DriverError> for LocatorError {
    fn from(err: DriverError) -> Self {
        LocatorError::Driver(err)
    }
}
