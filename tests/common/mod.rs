//! Shared fixtures for the cross-crate scenarios.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use action_flow::{Interaction, RetryPolicy, StepSpec};
use action_locator::LocatorSpec;
use async_trait::async_trait;
use browser_driver::stub::StubDriver;
use browser_driver::{
    BrowserDriver, DriverError, DriverErrorKind, ElementHandle, LoadState, NavigateOptions,
    PageHandle, PageInfo, PageSubscription, Selector, SessionHandle, SubscriptionId,
};
use chrono::{DateTime, Utc};
use timegate_cli::config::AppConfig;
use timegate_cli::Orchestrator;
use timegate_clock::{ClockError, ClockSync, TimeSource};
use timegate_core_types::{ProcessState, StatusEvent, TargetId};
use timegate_event_bus::StatusBus;
use timegate_process::{ProcessConfig, ProcessHandle, SiteProfile, StageScript, TargetConfig};
use timegate_scheduler::RuleKind;
use tokio::sync::broadcast;

pub const ENTRY: &str = "https://booking.example/";

/// Network clock running `skew_ms` ahead of the local one.
pub struct SkewedSource {
    pub skew_ms: i64,
}

#[async_trait]
impl TimeSource for SkewedSource {
    fn name(&self) -> &str {
        "skewed"
    }

    async fn fetch(&self) -> Result<DateTime<Utc>, ClockError> {
        Ok(Utc::now() + chrono::Duration::milliseconds(self.skew_ms))
    }
}

pub fn step(name: &str, action: Interaction, css: &str) -> StepSpec {
    StepSpec::new(name, action, vec![LocatorSpec::css(css)])
}

pub fn quick_retry(retries: u32) -> RetryPolicy {
    RetryPolicy::new(retries).with_delay(0).with_timeout(500)
}

pub fn profile() -> SiteProfile {
    let mut profile = SiteProfile::new(ENTRY);
    profile.consent = StageScript::new(vec![step("cookies", Interaction::Click, "#accept")]);
    profile.contact = StageScript::new(vec![
        step(
            "name",
            Interaction::Fill {
                text: "${name}".into(),
            },
            "#name",
        ),
        step("send", Interaction::Click, "#send"),
    ])
    .with_retry(quick_retry(2));
    profile.reservation =
        StageScript::new(vec![step("book", Interaction::Click, "#book")]).with_retry(quick_retry(2));
    profile
}

/// Config with one `site` profile, targets `alice` and `bob`, and a `once`
/// trigger at `fire_at`.
pub fn config(profile: SiteProfile, fire_at: DateTime<Utc>) -> AppConfig {
    let mut config = AppConfig::default();
    config.profiles.insert("site".into(), profile);
    config.targets = vec![
        TargetConfig::new("alice", "site").with_variable("name", "Alice"),
        TargetConfig::new("bob", "site").with_variable("name", "Bob"),
    ];
    config.trigger.rule = RuleKind::Once;
    config.trigger.once_at = Some(fire_at);
    config.trigger.recheck_interval_ms = 20;
    config.trigger.refresh_lead_ms = 200;
    config.trigger.grace_ms = 1_000;
    config.process = ProcessConfig::fast();
    config
}

pub fn in_ms(ms: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(ms)
}

pub struct Harness {
    pub driver: Arc<StubDriver>,
    pub bus: Arc<StatusBus>,
    pub orchestrator: Orchestrator,
}

pub async fn harness(config: &AppConfig, driver: Arc<StubDriver>, skew_ms: i64) -> Harness {
    let wired: Arc<dyn BrowserDriver> = driver.clone();
    harness_over(config, driver, wired, skew_ms).await
}

/// Like [`harness`], but the orchestrator talks to `wired`, which wraps `driver`.
pub async fn harness_over(
    config: &AppConfig,
    driver: Arc<StubDriver>,
    wired: Arc<dyn BrowserDriver>,
    skew_ms: i64,
) -> Harness {
    let bus = StatusBus::new(512);
    let clock = ClockSync::new(Arc::new(SkewedSource { skew_ms }), 10_000);
    clock.sync_once().await.unwrap();
    let orchestrator = Orchestrator::with_clock(config, clock, wired, bus.clone()).unwrap();
    Harness {
        driver,
        bus,
        orchestrator,
    }
}

pub fn id(value: &str) -> TargetId {
    TargetId::new(value)
}

pub async fn reach(handle: &ProcessHandle, state: ProcessState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {state}; stuck in {}", handle.state()))
        .unwrap();
}

pub fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// What a slowed interaction does once its delay is over.
#[derive(Clone, Copy, Debug)]
pub enum SlowEnd {
    Succeed,
    Reject,
}

/// Wraps the stub so clicks and fills on chosen selectors take `delay` and
/// then succeed or fail. Everything else goes straight to the stub.
pub struct SlowDriver {
    inner: Arc<StubDriver>,
    slow: HashMap<Selector, (Duration, SlowEnd)>,
    located: Mutex<HashMap<ElementHandle, Selector>>,
    started: AtomicUsize,
}

impl SlowDriver {
    pub fn new(inner: Arc<StubDriver>) -> Self {
        Self {
            inner,
            slow: HashMap::new(),
            located: Mutex::new(HashMap::new()),
            started: AtomicUsize::new(0),
        }
    }

    pub fn slow(mut self, css: &str, delay: Duration, end: SlowEnd) -> Self {
        self.slow.insert(Selector::Css(css.into()), (delay, end));
        self
    }

    /// Number of slowed interactions that have begun.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Resolves once a slowed interaction is in flight.
    pub async fn in_flight(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.started() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no slowed interaction started");
    }

    async fn delay(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let selector = self.located.lock().unwrap().get(element).cloned();
        let Some((delay, end)) = selector.and_then(|selector| self.slow.get(&selector).copied())
        else {
            return Ok(());
        };
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        match end {
            SlowEnd::Succeed => Ok(()),
            SlowEnd::Reject => Err(DriverError::new(DriverErrorKind::NotInteractable)
                .with_hint("page did not react")),
        }
    }
}

#[async_trait]
impl BrowserDriver for SlowDriver {
    async fn launch(&self) -> Result<SessionHandle, DriverError> {
        self.inner.launch().await
    }

    async fn new_page(&self, session: &SessionHandle) -> Result<PageHandle, DriverError> {
        self.inner.new_page(session).await
    }

    async fn navigate(
        &self,
        page: &PageHandle,
        url: &str,
        opts: NavigateOptions,
    ) -> Result<(), DriverError> {
        self.inner.navigate(page, url, opts).await
    }

    async fn reload(&self, page: &PageHandle, opts: NavigateOptions) -> Result<(), DriverError> {
        self.inner.reload(page, opts).await
    }

    async fn wait_for_load(
        &self,
        page: &PageHandle,
        state: LoadState,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        self.inner.wait_for_load(page, state, timeout).await
    }

    async fn page_info(&self, page: &PageHandle) -> Result<PageInfo, DriverError> {
        self.inner.page_info(page).await
    }

    async fn is_open(&self, page: &PageHandle) -> Result<bool, DriverError> {
        self.inner.is_open(page).await
    }

    async fn locate(
        &self,
        page: &PageHandle,
        selector: &Selector,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let found = self.inner.locate(page, selector).await?;
        if let Some(element) = &found {
            self.located
                .lock()
                .unwrap()
                .insert(element.clone(), selector.clone());
        }
        Ok(found)
    }

    async fn is_interactable(&self, element: &ElementHandle) -> Result<bool, DriverError> {
        self.inner.is_interactable(element).await
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError> {
        self.delay(element).await?;
        self.inner.click(element).await
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), DriverError> {
        self.delay(element).await?;
        self.inner.fill(element, text).await
    }

    async fn hover(&self, element: &ElementHandle) -> Result<(), DriverError> {
        self.inner.hover(element).await
    }

    fn subscribe_pages(&self, session: &SessionHandle) -> Result<PageSubscription, DriverError> {
        self.inner.subscribe_pages(session)
    }

    fn unsubscribe(&self, session: &SessionHandle, id: SubscriptionId) {
        self.inner.unsubscribe(session, id)
    }

    async fn close(&self, session: &SessionHandle) -> Result<(), DriverError> {
        self.inner.close(session).await
    }
}
