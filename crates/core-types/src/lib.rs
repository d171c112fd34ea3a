use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Key identifying one automation target (one reservation workflow).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TargetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque browser session owned by exactly one process until released.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(pub String);

impl SessionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PageHandle {
    pub session: SessionHandle,
    pub id: String,
}

impl PageHandle {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            id: Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session={} page={}", self.session.0, self.id)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    pub page: PageHandle,
    pub id: String,
}

impl ElementHandle {
    pub fn new(page: PageHandle, id: impl Into<String>) -> Self {
        Self {
            page,
            id: id.into(),
        }
    }
}

/// Lifecycle of one automation process.
///
/// `Stopped` is reachable from every non-terminal state through cancellation,
/// `Error` through an unrecovered fault.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Idle,
    Starting,
    Navigating,
    ConsentHandling,
    ContactInitiated,
    AwaitingIdentityVerification,
    WaitingForTrigger,
    AttemptingReservation,
    Success,
    Warning,
    Maintaining,
    Stopped,
    Error,
}

impl ProcessState {
    pub const ALL: [ProcessState; 13] = [
        ProcessState::Idle,
        ProcessState::Starting,
        ProcessState::Navigating,
        ProcessState::ConsentHandling,
        ProcessState::ContactInitiated,
        ProcessState::AwaitingIdentityVerification,
        ProcessState::WaitingForTrigger,
        ProcessState::AttemptingReservation,
        ProcessState::Success,
        ProcessState::Warning,
        ProcessState::Maintaining,
        ProcessState::Stopped,
        ProcessState::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Idle => "idle",
            ProcessState::Starting => "starting",
            ProcessState::Navigating => "navigating",
            ProcessState::ConsentHandling => "consent_handling",
            ProcessState::ContactInitiated => "contact_initiated",
            ProcessState::AwaitingIdentityVerification => "awaiting_identity_verification",
            ProcessState::WaitingForTrigger => "waiting_for_trigger",
            ProcessState::AttemptingReservation => "attempting_reservation",
            ProcessState::Success => "success",
            ProcessState::Warning => "warning",
            ProcessState::Maintaining => "maintaining",
            ProcessState::Stopped => "stopped",
            ProcessState::Error => "error",
        }
    }

    /// `Stopped` and `Error` end a process; nothing leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Error)
    }

    /// A process in an active state blocks a second `start` for the same target.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Stopped | Error) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Navigating)
                | (Navigating, ConsentHandling)
                | (ConsentHandling, ContactInitiated)
                | (ContactInitiated, AwaitingIdentityVerification)
                | (ContactInitiated, WaitingForTrigger)
                | (AwaitingIdentityVerification, WaitingForTrigger)
                | (WaitingForTrigger, AttemptingReservation)
                | (AttemptingReservation, Success)
                | (ConsentHandling, Warning)
                | (ContactInitiated, Warning)
                | (AttemptingReservation, Warning)
                | (Success, Maintaining)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown process state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for ProcessState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    #[default]
    Info,
    Warn,
    Error,
}

/// One published transition or fault. Never persisted by the kernel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub id: TargetId,
    pub state: ProcessState,
    pub level: StatusLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(id: TargetId, state: ProcessState, message: impl Into<String>) -> Self {
        Self {
            id,
            state,
            level: StatusLevel::Info,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_level(mut self, level: StatusLevel) -> Self {
        self.level = level;
        self
    }
}
