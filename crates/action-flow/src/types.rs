//! Core types for retried steps

use action_locator::LocatorSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::errors::FlowError;

/// What to do between two attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryKind {
    #[default]
    None,
    /// Reload the current page before the next attempt
    Reload,
}

/// Bounded retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub retries: u32,
    pub per_try_timeout_ms: u64,
    pub between_try_delay_ms: u64,
    pub recovery: RecoveryKind,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            per_try_timeout_ms: 10_000,
            between_try_delay_ms: 500,
            recovery: RecoveryKind::None,
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.per_try_timeout_ms = timeout_ms;
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.between_try_delay_ms = delay_ms;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryKind) -> Self {
        self.recovery = recovery;
        self
    }

    /// Zero is treated as a single attempt
    pub fn max_attempts(&self) -> u32 {
        self.retries.max(1)
    }

    pub fn per_try_timeout(&self) -> Option<Duration> {
        (self.per_try_timeout_ms > 0).then(|| Duration::from_millis(self.per_try_timeout_ms))
    }

    pub fn between_try_delay(&self) -> Duration {
        Duration::from_millis(self.between_try_delay_ms)
    }
}

/// Why a single attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Failed(err) => write!(f, "{err}"),
            AttemptError::TimedOut(after) => write!(f, "attempt timed out after {after:?}"),
        }
    }
}

/// Structured result of a retried action. Exhaustion is a value, not a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: AttemptError<E> },
    Cancelled { attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryOutcome::Cancelled { .. })
    }
}

/// Primitive interaction performed on a resolved element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Interaction {
    Click,
    Fill { text: String },
    Hover,
}

impl Interaction {
    pub fn name(&self) -> &'static str {
        match self {
            Interaction::Click => "click",
            Interaction::Fill { .. } => "fill",
            Interaction::Hover => "hover",
        }
    }
}

/// One locate-and-act step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(flatten)]
    pub action: Interaction,
    pub candidates: Vec<LocatorSpec>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, action: Interaction, candidates: Vec<LocatorSpec>) -> Self {
        Self {
            name: name.into(),
            action,
            candidates,
        }
    }
}

/// Replaces every `${name}` with its value from `vars`.
pub fn render(template: &str, vars: &HashMap<String, String>) -> Result<String, FlowError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        let value = vars
            .get(name)
            .ok_or_else(|| FlowError::UnknownVariable(name.to_string()))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
