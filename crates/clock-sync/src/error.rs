use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("time request failed: {0}")]
    Request(String),

    #[error("time request timed out")]
    Timeout,

    #[error("response carried no Date header")]
    MissingDateHeader,

    #[error("response field '{0}' missing or not numeric")]
    MissingField(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid clock configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClockError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClockError::Timeout
        } else {
            ClockError::Request(err.to_string())
        }
    }
}
