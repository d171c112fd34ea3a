use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("invalid time of day '{0}', expected HH:MM[:SS]")]
    InvalidTime(String),
    #[error("utc offset of {0} minutes is out of range")]
    InvalidOffset(i32),
    #[error("rule 'once' requires an instant")]
    MissingInstant,
    #[error("trigger rule yields no future instant")]
    Exhausted,
}
