use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use timegate_core_types::{ProcessState, TargetId};

/// Point-in-time view of one process, as returned by `status()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessSnapshot {
    pub id: TargetId,
    pub state: ProcessState,
    /// Attempts spent by the most recent retried step.
    pub retry_counter: u32,
    pub last_action_at: Option<DateTime<Utc>>,
    pub popup_url: Option<String>,
    pub last_message: String,
    pub started_at: DateTime<Utc>,
    pub cancel_requested: bool,
}

impl ProcessSnapshot {
    pub fn new(id: TargetId) -> Self {
        Self {
            id,
            state: ProcessState::Idle,
            retry_counter: 0,
            last_action_at: None,
            popup_url: None,
            last_message: String::new(),
            started_at: Utc::now(),
            cancel_requested: false,
        }
    }
}

/// Per-id answer to `start`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum StartAck {
    Started,
    /// A process for this id is already active; nothing was done.
    AlreadyActive,
    Rejected(String),
}

/// Per-id answer to `stop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAck {
    /// Cancellation requested; the process is unwinding.
    Stopping,
    /// The entry was already terminal and has been removed.
    Removed,
    NotFound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopOptions {
    /// When false the session is detached instead of closed.
    pub close_session: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            close_session: true,
        }
    }
}

impl StopOptions {
    pub fn detach() -> Self {
        Self {
            close_session: false,
        }
    }
}
