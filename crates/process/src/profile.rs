//! Site profiles: the per-site data a process runs against.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use action_flow::{RetryPolicy, StepSpec};
use action_locator::LocatorSpec;
use popup_watcher::PopupClassifier;
use serde::{Deserialize, Serialize};
use timegate_core_types::{ProcessState, TargetId};

use crate::errors::ProcessError;

/// What a scripted stage does when a step runs out of attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Report the miss and carry on with the next step.
    Continue,
    /// Enter `Warning` and keep the session for manual follow-up.
    Warn,
    /// Escalate to `Error`.
    Fail,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Consent,
    Contact,
    Reservation,
}

impl Stage {
    pub fn state(self) -> ProcessState {
        match self {
            Stage::Consent => ProcessState::ConsentHandling,
            Stage::Contact => ProcessState::ContactInitiated,
            Stage::Reservation => ProcessState::AttemptingReservation,
        }
    }

    pub fn default_policy(self) -> ExhaustionPolicy {
        match self {
            Stage::Consent => ExhaustionPolicy::Continue,
            Stage::Contact => ExhaustionPolicy::Fail,
            Stage::Reservation => ExhaustionPolicy::Warn,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Consent => "consent",
            Stage::Contact => "contact",
            Stage::Reservation => "reservation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageScript {
    pub steps: Vec<StepSpec>,
    pub retry: RetryPolicy,
    /// Falls back to the stage's default when unset.
    pub on_exhausted: Option<ExhaustionPolicy>,
}

impl StageScript {
    pub fn new(steps: Vec<StepSpec>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.on_exhausted = Some(policy);
        self
    }

    pub fn policy_for(&self, stage: Stage) -> ExhaustionPolicy {
        self.on_exhausted.unwrap_or_else(|| stage.default_policy())
    }
}

/// Out-of-band identity verification opened by the contact stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSpec {
    pub url_patterns: Vec<String>,
    pub title_patterns: Vec<String>,
    pub popup_timeout_ms: u64,
    pub close_timeout_ms: u64,
}

impl Default for VerificationSpec {
    fn default() -> Self {
        Self {
            url_patterns: Vec::new(),
            title_patterns: Vec::new(),
            popup_timeout_ms: 60_000,
            close_timeout_ms: 300_000,
        }
    }
}

impl VerificationSpec {
    pub fn classifier(&self) -> Result<PopupClassifier, popup_watcher::PopupError> {
        PopupClassifier::new(&self.url_patterns, &self.title_patterns)
    }

    pub fn popup_timeout(&self) -> Duration {
        Duration::from_millis(self.popup_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// Interaction repeated while holding a successful reservation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeepAlive {
    #[default]
    None,
    Reload,
    Hover { candidates: Vec<LocatorSpec> },
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub entry_url: String,
    #[serde(default)]
    pub fallback_urls: Vec<String>,
    #[serde(default)]
    pub consent: StageScript,
    #[serde(default)]
    pub contact: StageScript,
    #[serde(default)]
    pub reservation: StageScript,
    #[serde(default)]
    pub verification: Option<VerificationSpec>,
    /// Reload the page on the scheduler's pre-fire signal.
    #[serde(default = "default_true")]
    pub refresh_before_fire: bool,
    #[serde(default)]
    pub keepalive: KeepAlive,
}

impl SiteProfile {
    pub fn new(entry_url: impl Into<String>) -> Self {
        Self {
            entry_url: entry_url.into(),
            fallback_urls: Vec::new(),
            consent: StageScript::default(),
            contact: StageScript::default(),
            reservation: StageScript::default(),
            verification: None,
            refresh_before_fire: true,
            keepalive: KeepAlive::None,
        }
    }

    pub fn script(&self, stage: Stage) -> &StageScript {
        match stage {
            Stage::Consent => &self.consent,
            Stage::Contact => &self.contact,
            Stage::Reservation => &self.reservation,
        }
    }

    /// Entry URL followed by fallbacks, in order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.entry_url.as_str()).chain(self.fallback_urls.iter().map(String::as_str))
    }

    pub fn validate(&self, name: &str) -> Result<(), ProcessError> {
        let invalid = |reason: String| ProcessError::InvalidProfile {
            profile: name.to_string(),
            reason,
        };
        if self.entry_url.trim().is_empty() {
            return Err(invalid("entry_url must not be empty".into()));
        }
        for stage in [Stage::Consent, Stage::Contact, Stage::Reservation] {
            for step in &self.script(stage).steps {
                if step.candidates.is_empty() {
                    return Err(invalid(format!(
                        "{stage} step '{}' has no candidates",
                        step.name
                    )));
                }
            }
        }
        if let KeepAlive::Hover { candidates } = &self.keepalive {
            if candidates.is_empty() {
                return Err(invalid("hover keepalive needs candidates".into()));
            }
        }
        if let Some(verification) = &self.verification {
            verification
                .classifier()
                .map_err(|err| invalid(err.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: TargetId,
    pub profile: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl TargetConfig {
    pub fn new(id: impl Into<TargetId>, profile: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            profile: profile.into(),
            variables: HashMap::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

/// Profiles and the targets that use them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub profiles: BTreeMap<String, SiteProfile>,
    pub targets: Vec<TargetConfig>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, name: impl Into<String>, profile: SiteProfile) -> Self {
        self.profiles.insert(name.into(), profile);
        self
    }

    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.targets.push(target);
        self
    }

    pub fn validate(&self) -> Result<(), ProcessError> {
        for (name, profile) in &self.profiles {
            profile.validate(name)?;
        }
        for target in &self.targets {
            if !self.profiles.contains_key(&target.profile) {
                return Err(ProcessError::UnknownProfile {
                    target: target.id.to_string(),
                    profile: target.profile.clone(),
                });
            }
        }
        Ok(())
    }
}
