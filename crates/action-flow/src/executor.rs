//! Retry executor and step runner

use crate::errors::FlowError;
use crate::strategies::{Recovery, ReloadRecovery};
use crate::types::*;
use action_locator::{ElementResolver, Resolution};
use browser_driver::{BrowserDriver, NavigateOptions, PageHandle};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs an action up to `policy.retries` times.
///
/// Cancellation is checked before every attempt and interrupts the delay
/// between attempts. An attempt already in flight is allowed to finish; if it
/// fails after cancellation the outcome is `Cancelled`, never `Exhausted`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor;

impl RetryExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn attempt<T, E, F, Fut>(
        &self,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut action: F,
        recovery: Option<&dyn Recovery>,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        E: Display + Send,
    {
        let max_attempts = policy.max_attempts();
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome::Cancelled { attempts };
            }
            attempts += 1;

            let result = match policy.per_try_timeout() {
                Some(limit) => match timeout(limit, action(attempts)).await {
                    Ok(result) => result.map_err(AttemptError::Failed),
                    Err(_) => Err(AttemptError::TimedOut(limit)),
                },
                None => action(attempts).await.map_err(AttemptError::Failed),
            };

            let err = match result {
                Ok(value) => {
                    debug!(attempts, "attempt succeeded");
                    return RetryOutcome::Succeeded { value, attempts };
                }
                Err(err) => err,
            };

            // A stop that landed during the attempt wins over its failure.
            if cancel.is_cancelled() {
                debug!(attempts, error = %err, "attempt failed after cancellation");
                return RetryOutcome::Cancelled { attempts };
            }
            if attempts >= max_attempts {
                warn!(attempts, error = %err, "attempts exhausted");
                return RetryOutcome::Exhausted {
                    attempts,
                    last_error: err,
                };
            }
            debug!(attempt = attempts, max_attempts, error = %err, "attempt failed; retrying");

            let delay = policy.between_try_delay();
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return RetryOutcome::Cancelled { attempts },
                    _ = sleep(delay) => {}
                }
            }
            if let Some(recovery) = recovery {
                if cancel.is_cancelled() {
                    return RetryOutcome::Cancelled { attempts };
                }
                recovery.recover(attempts).await;
            }
        }
    }
}

/// Resolves a step's candidates and performs its interaction, with retries.
pub struct StepRunner {
    driver: Arc<dyn BrowserDriver>,
    resolver: Arc<dyn ElementResolver>,
    executor: RetryExecutor,
    reload_opts: NavigateOptions,
}

impl StepRunner {
    pub fn new(driver: Arc<dyn BrowserDriver>, resolver: Arc<dyn ElementResolver>) -> Self {
        Self {
            driver,
            resolver,
            executor: RetryExecutor::new(),
            reload_opts: NavigateOptions::default(),
        }
    }

    pub fn with_reload_options(mut self, opts: NavigateOptions) -> Self {
        self.reload_opts = opts;
        self
    }

    pub async fn run(
        &self,
        page: &PageHandle,
        step: &StepSpec,
        vars: &HashMap<String, String>,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> RetryOutcome<Resolution, FlowError> {
        let action = match &step.action {
            Interaction::Fill { text } => match render(text, vars) {
                Ok(text) => Interaction::Fill { text },
                Err(err) => {
                    warn!(step = %step.name, error = %err, "step cannot be rendered");
                    return RetryOutcome::Exhausted {
                        attempts: 0,
                        last_error: AttemptError::Failed(err),
                    };
                }
            },
            other => other.clone(),
        };

        let reload;
        let recovery: Option<&dyn Recovery> = match policy.recovery {
            RecoveryKind::None => None,
            RecoveryKind::Reload => {
                reload = ReloadRecovery::new(self.driver.clone(), page.clone(), self.reload_opts);
                Some(&reload)
            }
        };

        let outcome = self
            .executor
            .attempt(
                policy,
                cancel,
                |_attempt| self.locate_and_act(page, &step.candidates, &action),
                recovery,
            )
            .await;
        if let RetryOutcome::Succeeded { value, attempts } = &outcome {
            info!(
                step = %step.name,
                action = action.name(),
                candidate = %value.label,
                attempts,
                "step completed"
            );
        }
        outcome
    }

    async fn locate_and_act(
        &self,
        page: &PageHandle,
        candidates: &[action_locator::LocatorSpec],
        action: &Interaction,
    ) -> Result<Resolution, FlowError> {
        let resolution = self.resolver.resolve(page, candidates).await?;
        match action {
            Interaction::Click => self.driver.click(&resolution.element).await?,
            Interaction::Fill { text } => self.driver.fill(&resolution.element, text).await?,
            Interaction::Hover => self.driver.hover(&resolution.element).await?,
        }
        Ok(resolution)
    }
}
