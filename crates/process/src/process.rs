//! One automation process: a handle shared with the registry, and the task
//! that walks the state machine.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use action_flow::{RetryOutcome, StepRunner};
use action_locator::ElementResolver;
use browser_driver::{BrowserDriver, LoadState, NavigateOptions, PageHandle, SessionHandle};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use popup_watcher::{CloseOutcome, PopupError, PopupOutcome, PopupWatch, PopupWatcher};
use timegate_core_types::{ProcessState, StatusEvent, StatusLevel, TargetId};
use timegate_event_bus::StatusSink;
use timegate_scheduler::{TriggerEvent, TriggerScheduler};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::errors::ProcessError;
use crate::metrics;
use crate::model::ProcessSnapshot;
use crate::pacing::Pacer;
use crate::profile::{ExhaustionPolicy, KeepAlive, SiteProfile, Stage, TargetConfig};

/// Registry-side view of a running process.
pub struct ProcessHandle {
    id: TargetId,
    run_id: u64,
    cancel: CancellationToken,
    snapshot: RwLock<ProcessSnapshot>,
    state_tx: watch::Sender<ProcessState>,
    session: Mutex<Option<SessionHandle>>,
    close_on_stop: AtomicBool,
    sink: Arc<dyn StatusSink>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessHandle {
    pub(crate) fn new(
        id: TargetId,
        run_id: u64,
        session: SessionHandle,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ProcessState::Idle);
        Self {
            snapshot: RwLock::new(ProcessSnapshot::new(id.clone())),
            id,
            run_id,
            cancel: CancellationToken::new(),
            state_tx,
            session: Mutex::new(Some(session)),
            close_on_stop: AtomicBool::new(true),
            sink,
            task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &TargetId {
        &self.id
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn state(&self) -> ProcessState {
        *self.state_tx.borrow()
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        self.snapshot.read().clone()
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.session.lock().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Watch channel following every state change.
    pub fn watch_state(&self) -> watch::Receiver<ProcessState> {
        self.state_tx.subscribe()
    }

    /// Resolves once the process reaches `Stopped` or `Error`.
    pub async fn wait_terminal(&self) -> ProcessState {
        let mut rx = self.state_tx.subscribe();
        let state = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }

    /// Sets the cancel flag. The flag is never cleared.
    pub(crate) fn request_stop(&self, close_session: bool) {
        if !close_session {
            self.close_on_stop.store(false, Ordering::SeqCst);
        }
        self.snapshot.write().cancel_requested = true;
        self.cancel.cancel();
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn attach_task(&self, task: JoinHandle<()>) {
        *self.task.lock() = Some(task);
    }

    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().take()
    }

    /// Applies and publishes a transition. Illegal transitions are dropped.
    pub(crate) fn transition(
        &self,
        next: ProcessState,
        level: StatusLevel,
        message: impl Into<String>,
    ) -> bool {
        let message = message.into();
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!(target_id = %self.id, from = %current, to = %next, "illegal transition ignored");
            return false;
        }
        {
            let mut snapshot = self.snapshot.write();
            snapshot.state = next;
            snapshot.last_message = message.clone();
        }
        metrics::record_transition(next);
        info!(target_id = %self.id, from = %current, state = %next, "{message}");
        self.sink
            .emit(StatusEvent::new(self.id.clone(), next, message).with_level(level));
        // watchers see the new state only after the event is out
        self.state_tx.send_replace(next);
        true
    }

    /// Reports something in the current state without changing it.
    pub(crate) fn report(&self, level: StatusLevel, message: impl Into<String>) {
        let message = message.into();
        let state = {
            let mut snapshot = self.snapshot.write();
            snapshot.last_message = message.clone();
            snapshot.state
        };
        match level {
            StatusLevel::Info => info!(target_id = %self.id, state = %state, "{message}"),
            _ => warn!(target_id = %self.id, state = %state, "{message}"),
        }
        self.sink
            .emit(StatusEvent::new(self.id.clone(), state, message).with_level(level));
    }

    fn record_action(&self, attempts: u32) {
        let mut snapshot = self.snapshot.write();
        snapshot.retry_counter = attempts;
        snapshot.last_action_at = Some(Utc::now());
    }

    fn record_popup(&self, url: &str) {
        self.snapshot.write().popup_url = Some(url.to_string());
    }

    /// Gives the session back at most once. Close failures are logged and swallowed.
    pub(crate) async fn release_session(&self, driver: &dyn BrowserDriver, close: bool) {
        let taken = self.session.lock().take();
        let Some(session) = taken else {
            return;
        };
        if !close {
            info!(target_id = %self.id, session = %session.0, "session detached");
            return;
        }
        match driver.close(&session).await {
            Ok(()) => debug!(target_id = %self.id, session = %session.0, "session closed"),
            Err(err) => {
                warn!(target_id = %self.id, session = %session.0, error = %err, "session release failed; ignoring")
            }
        }
    }
}

/// Collaborators shared by every process of one registry.
pub(crate) struct ProcessContext {
    pub driver: Arc<dyn BrowserDriver>,
    pub resolver: Arc<dyn ElementResolver>,
    pub runner: StepRunner,
    pub popups: PopupWatcher,
    pub trigger: Arc<TriggerScheduler>,
    pub pacer: Pacer,
    pub config: ProcessConfig,
    pub processes: Arc<DashMap<TargetId, Arc<ProcessHandle>>>,
}

enum Interrupt {
    Cancelled,
    Fault(ProcessError),
}

impl From<ProcessError> for Interrupt {
    fn from(err: ProcessError) -> Self {
        Interrupt::Fault(err)
    }
}

type StageResult<T = ()> = Result<T, Interrupt>;

enum StageVerdict {
    Completed,
    Degraded(String),
}

pub(crate) struct AutomationProcess {
    ctx: Arc<ProcessContext>,
    handle: Arc<ProcessHandle>,
    profile: SiteProfile,
    variables: HashMap<String, String>,
    cancel: CancellationToken,
}

impl AutomationProcess {
    pub(crate) fn new(
        ctx: Arc<ProcessContext>,
        handle: Arc<ProcessHandle>,
        profile: SiteProfile,
        target: &TargetConfig,
    ) -> Self {
        let cancel = handle.cancel_token();
        Self {
            ctx,
            handle,
            profile,
            variables: target.variables.clone(),
            cancel,
        }
    }

    pub(crate) async fn run(self) {
        let interrupt = match self.stages().await {
            // hold states only end through cancellation
            Ok(()) => Interrupt::Cancelled,
            Err(interrupt) => interrupt,
        };
        match interrupt {
            Interrupt::Cancelled => self.finish_stopped().await,
            Interrupt::Fault(err) if self.cancel.is_cancelled() => {
                debug!(target_id = %self.handle.id, error = %err, "fault after stop request; stopping");
                self.finish_stopped().await
            }
            Interrupt::Fault(err) => self.finish_error(err).await,
        }
        metrics::record_exit();
    }

    /// Session and registry entry are gone before `Stopped` is observable.
    async fn finish_stopped(&self) {
        let close = self.handle.close_on_stop.load(Ordering::SeqCst);
        self.handle
            .release_session(self.ctx.driver.as_ref(), close)
            .await;
        let run_id = self.handle.run_id;
        self.ctx
            .processes
            .remove_if(&self.handle.id, |_, entry| entry.run_id == run_id);
        self.handle
            .transition(ProcessState::Stopped, StatusLevel::Info, "stopped on request");
    }

    /// The entry stays so the failure can be inspected until an explicit stop.
    async fn finish_error(&self, err: ProcessError) {
        self.handle
            .release_session(self.ctx.driver.as_ref(), true)
            .await;
        self.handle
            .transition(ProcessState::Error, StatusLevel::Error, err.to_string());
    }

    fn checkpoint(&self) -> StageResult {
        if self.cancel.is_cancelled() {
            Err(Interrupt::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs `fut` unless cancellation arrives first.
    async fn guarded<F: Future>(&self, fut: F) -> StageResult<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            out = fut => Ok(out),
        }
    }

    fn enter(&self, state: ProcessState, message: impl Into<String>) -> StageResult {
        self.checkpoint()?;
        self.handle.transition(state, StatusLevel::Info, message);
        Ok(())
    }

    async fn stages(&self) -> StageResult {
        let session = self
            .handle
            .session()
            .ok_or_else(|| ProcessError::Stage {
                stage: "starting".into(),
                reason: "session already released".into(),
            })?;

        self.enter(ProcessState::Navigating, "opening entry page")?;
        let page = self.navigate(&session).await?;

        self.enter(ProcessState::ConsentHandling, "handling consent prompts")?;
        if let StageVerdict::Degraded(reason) = self.run_stage(Stage::Consent, &page).await? {
            return self.hold_warning(reason).await;
        }

        // Subscribe before the contact clicks so a popup they open is not missed.
        let popup_watch = match &self.profile.verification {
            Some(_) => Some(
                self.ctx
                    .popups
                    .watch(&session)
                    .map_err(ProcessError::Verification)?,
            ),
            None => None,
        };
        self.enter(ProcessState::ContactInitiated, "submitting contact details")?;
        if let StageVerdict::Degraded(reason) = self.run_stage(Stage::Contact, &page).await? {
            drop(popup_watch);
            return self.hold_warning(reason).await;
        }

        if let Some(watch) = popup_watch {
            self.enter(
                ProcessState::AwaitingIdentityVerification,
                "waiting for identity verification",
            )?;
            self.await_verification(watch).await?;
        }

        self.wait_for_trigger(&page).await?;

        self.enter(ProcessState::AttemptingReservation, "trigger fired; reserving")?;
        match self.run_stage(Stage::Reservation, &page).await? {
            StageVerdict::Completed => {
                self.enter(ProcessState::Success, "reservation submitted")?;
                self.maintain(&page).await
            }
            StageVerdict::Degraded(reason) => self.hold_warning(reason).await,
        }
    }

    async fn navigate(&self, session: &SessionHandle) -> StageResult<PageHandle> {
        let driver = &self.ctx.driver;
        let page = self
            .guarded(driver.new_page(session))
            .await?
            .map_err(ProcessError::Driver)?;

        let urls: Vec<&str> = self.profile.urls().collect();
        let attempts = self.ctx.config.navigation_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            self.checkpoint()?;
            let url = urls[(attempt as usize - 1) % urls.len()];
            let wait_until = if attempt == 1 {
                LoadState::Load
            } else {
                LoadState::DomContentLoaded
            };
            let opts = NavigateOptions {
                wait_until,
                timeout: self.ctx.config.navigation_timeout(),
            };
            debug!(target_id = %self.handle.id, url, attempt, ?wait_until, "navigating");

            let loaded = match self.guarded(driver.navigate(&page, url, opts)).await? {
                Ok(()) => {
                    self.guarded(driver.wait_for_load(
                        &page,
                        wait_until,
                        self.ctx.config.load_timeout(),
                    ))
                    .await?
                }
                Err(err) => Err(err),
            };
            match loaded {
                Ok(()) => {
                    self.handle.record_action(attempt);
                    return Ok(page);
                }
                Err(err) => {
                    last_error = err.to_string();
                    self.handle.record_action(attempt);
                    self.handle.report(
                        StatusLevel::Warn,
                        format!("navigation attempt {attempt}/{attempts} to {url} failed: {err}"),
                    );
                }
            }
        }
        Err(ProcessError::Navigation {
            attempts,
            last_error,
        }
        .into())
    }

    async fn run_stage(&self, stage: Stage, page: &PageHandle) -> StageResult<StageVerdict> {
        let script = self.profile.script(stage);
        let policy = script.policy_for(stage);

        for (index, step) in script.steps.iter().enumerate() {
            if index > 0 && !self.ctx.pacer.pause(&self.cancel).await {
                return Err(Interrupt::Cancelled);
            }
            self.checkpoint()?;
            let outcome = self
                .ctx
                .runner
                .run(page, step, &self.variables, &script.retry, &self.cancel)
                .await;
            self.handle.record_action(outcome.attempts());
            match outcome {
                RetryOutcome::Succeeded { .. } => {}
                RetryOutcome::Cancelled { .. } => return Err(Interrupt::Cancelled),
                RetryOutcome::Exhausted {
                    attempts,
                    last_error,
                } => {
                    let reason = format!(
                        "step '{}' gave up after {attempts} attempts: {last_error}",
                        step.name
                    );
                    match policy {
                        ExhaustionPolicy::Continue => {
                            self.handle
                                .report(StatusLevel::Warn, format!("{stage}: {reason}; continuing"));
                        }
                        ExhaustionPolicy::Warn => {
                            return Ok(StageVerdict::Degraded(format!("{stage}: {reason}")))
                        }
                        ExhaustionPolicy::Fail => {
                            return Err(ProcessError::Stage {
                                stage: stage.name().to_string(),
                                reason,
                            }
                            .into())
                        }
                    }
                }
            }
        }
        Ok(StageVerdict::Completed)
    }

    async fn await_verification(&self, watch: PopupWatch) -> StageResult {
        let Some(spec) = &self.profile.verification else {
            return Ok(());
        };
        let classifier = spec.classifier().map_err(ProcessError::Verification)?;

        let popup = match watch
            .wait(&classifier, spec.popup_timeout(), &self.cancel)
            .await
            .map_err(popup_interrupt)?
        {
            PopupOutcome::Accepted(popup) => popup,
            PopupOutcome::TimedOut => {
                self.handle.report(
                    StatusLevel::Warn,
                    "verification window did not appear in time; continuing",
                );
                return Ok(());
            }
        };
        self.handle.record_popup(&popup.info.url);
        self.handle.report(
            StatusLevel::Info,
            format!("verification window open at {}", popup.info.url),
        );

        match self
            .ctx
            .popups
            .wait_for_close(&popup.page, spec.close_timeout(), &self.cancel)
            .await
            .map_err(popup_interrupt)?
        {
            CloseOutcome::Closed => {
                self.handle
                    .report(StatusLevel::Info, "verification window closed");
            }
            CloseOutcome::TimedOut => {
                self.handle.report(
                    StatusLevel::Warn,
                    "verification window still open after timeout; continuing",
                );
            }
        }
        Ok(())
    }

    async fn wait_for_trigger(&self, page: &PageHandle) -> StageResult {
        let mut events = self.ctx.trigger.subscribe();
        let message = match self.ctx.trigger.next_target() {
            Some(at) => format!("waiting for trigger at {}", at.to_rfc3339()),
            None => "waiting for trigger".to_string(),
        };
        self.enter(ProcessState::WaitingForTrigger, message)?;

        loop {
            let event = self.guarded(events.recv()).await?;
            match event {
                Ok(TriggerEvent::Fired(fire)) => {
                    debug!(target_id = %self.handle.id, late_by_ms = fire.late_by_ms, "trigger received");
                    return Ok(());
                }
                Ok(TriggerEvent::PreFire { target }) => {
                    if self.profile.refresh_before_fire {
                        self.refresh(page, target).await?;
                    }
                }
                Ok(TriggerEvent::Missed { target, late_by_ms }) => {
                    self.handle.report(
                        StatusLevel::Warn,
                        format!(
                            "trigger at {} missed by {late_by_ms}ms; waiting for next period",
                            target.to_rfc3339()
                        ),
                    );
                }
                Ok(TriggerEvent::Armed { target }) => {
                    debug!(target_id = %self.handle.id, instant = %target.to_rfc3339(), "trigger re-armed");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target_id = %self.handle.id, skipped, "trigger events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ProcessError::TriggerClosed.into());
                }
            }
        }
    }

    async fn refresh(&self, page: &PageHandle, target: chrono::DateTime<Utc>) -> StageResult {
        let opts = NavigateOptions {
            wait_until: LoadState::DomContentLoaded,
            timeout: self.ctx.config.navigation_timeout(),
        };
        match self.guarded(self.ctx.driver.reload(page, opts)).await? {
            Ok(()) => debug!(
                target_id = %self.handle.id,
                instant = %target.to_rfc3339(),
                "page refreshed ahead of trigger"
            ),
            Err(err) => self.handle.report(
                StatusLevel::Warn,
                format!("pre-trigger refresh failed: {err}"),
            ),
        }
        Ok(())
    }

    async fn hold_warning(&self, reason: String) -> StageResult {
        self.checkpoint()?;
        self.handle
            .transition(ProcessState::Warning, StatusLevel::Warn, reason);
        self.cancel.cancelled().await;
        Ok(())
    }

    async fn maintain(&self, page: &PageHandle) -> StageResult {
        self.enter(ProcessState::Maintaining, "holding session")?;
        let mut ticker = tokio::time::interval(self.ctx.config.maintain_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.guarded(self.keep_alive(page)).await? {
                self.handle
                    .report(StatusLevel::Warn, format!("keep-alive failed: {err}"));
            }
        }
    }

    async fn keep_alive(&self, page: &PageHandle) -> Result<(), ProcessError> {
        match &self.profile.keepalive {
            KeepAlive::None => Ok(()),
            KeepAlive::Reload => {
                let opts = NavigateOptions {
                    wait_until: LoadState::DomContentLoaded,
                    timeout: self.ctx.config.navigation_timeout(),
                };
                self.ctx.driver.reload(page, opts).await?;
                self.handle.record_action(1);
                Ok(())
            }
            KeepAlive::Hover { candidates } => {
                let resolution = self
                    .ctx
                    .resolver
                    .resolve(page, candidates)
                    .await
                    .map_err(|err| ProcessError::Stage {
                        stage: "maintaining".into(),
                        reason: err.to_string(),
                    })?;
                self.ctx.driver.hover(&resolution.element).await?;
                self.handle.record_action(1);
                Ok(())
            }
        }
    }
}

fn popup_interrupt(err: PopupError) -> Interrupt {
    match err {
        PopupError::Cancelled => Interrupt::Cancelled,
        other => Interrupt::Fault(ProcessError::Verification(other)),
    }
}
