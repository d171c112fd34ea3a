//! Scriptable in-memory driver.
//!
//! Elements, navigation faults, popups and timing are configured up front; every call is
//! recorded so tests can assert on what the kernel actually did.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

use crate::{
    BrowserDriver, DriverError, DriverErrorKind, ElementHandle, LoadState, NavigateOptions,
    PageEvent, PageHandle, PageInfo, PageSubscription, Selector, SessionHandle, SubscriptionId,
};

/// How a scripted element answers probes.
#[derive(Clone, Debug)]
pub struct ElementBehavior {
    pub interactable: bool,
    /// Number of `locate` probes that return nothing before the element shows up.
    pub appear_after_probes: u32,
    /// Number of clicks rejected with `NotInteractable` before clicks succeed.
    pub click_failures: u32,
}

impl Default for ElementBehavior {
    fn default() -> Self {
        Self {
            interactable: true,
            appear_after_probes: 0,
            click_failures: 0,
        }
    }
}

impl ElementBehavior {
    pub fn interactable() -> Self {
        Self::default()
    }

    pub fn hidden() -> Self {
        Self {
            interactable: false,
            ..Self::default()
        }
    }

    pub fn appearing_after(probes: u32) -> Self {
        Self {
            appear_after_probes: probes,
            ..Self::default()
        }
    }

    pub fn failing_clicks(times: u32) -> Self {
        Self {
            click_failures: times,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct ElementRule {
    selector: Selector,
    behavior: ElementBehavior,
    probes: u32,
    click_failures_left: u32,
}

impl ElementRule {
    fn new(selector: Selector, behavior: ElementBehavior) -> Self {
        let click_failures_left = behavior.click_failures;
        Self {
            selector,
            behavior,
            probes: 0,
            click_failures_left,
        }
    }
}

#[derive(Clone, Debug)]
struct PopupScript {
    url: String,
    title: String,
    close_after: Option<Duration>,
}

#[derive(Debug)]
struct PageRecord {
    handle: PageHandle,
    info: PageInfo,
    open: bool,
}

#[derive(Debug, Default)]
struct SessionRecord {
    open: bool,
    subscribers: HashMap<u64, mpsc::UnboundedSender<PageEvent>>,
}

#[derive(Debug, Default)]
struct StubState {
    sessions: HashMap<SessionHandle, SessionRecord>,
    pages: HashMap<String, PageRecord>,
    elements: HashMap<String, ElementRule>,
    default_behavior: Option<ElementBehavior>,
    popups_on_click: HashMap<String, PopupScript>,
    launch_failures: u32,
    close_fails: bool,
    navigate_delay: Duration,
    navigation_failures: HashMap<String, u32>,
    load_delay: Duration,
    page_info_fails: bool,
    next_subscription: u64,
    launches: usize,
    closes: usize,
    reloads: usize,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    navigations: Vec<String>,
    locates: Vec<Selector>,
    clicks: Vec<Selector>,
    fills: Vec<(Selector, String)>,
    hovers: Vec<Selector>,
}

impl StubState {
    fn emit(&mut self, session: &SessionHandle, event: PageEvent) {
        if let Some(record) = self.sessions.get_mut(session) {
            for sender in record.subscribers.values() {
                let _ = sender.send(event.clone());
            }
        }
    }

    fn rule_mut(&mut self, selector: &Selector) -> Option<&mut ElementRule> {
        let key = selector.to_string();
        if !self.elements.contains_key(&key) {
            let behavior = self.default_behavior.clone()?;
            self.elements
                .insert(key.clone(), ElementRule::new(selector.clone(), behavior));
        }
        self.elements.get_mut(&key)
    }

    fn ensure_session_open(&self, session: &SessionHandle) -> Result<(), DriverError> {
        match self.sessions.get(session) {
            Some(record) if record.open => Ok(()),
            _ => Err(DriverError::new(DriverErrorKind::SessionClosed)
                .with_hint(format!("session {}", session.0))),
        }
    }
}

pub struct StubDriver {
    me: Weak<StubDriver>,
    state: Mutex<StubState>,
}

impl StubDriver {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: Mutex::new(StubState::default()),
        })
    }

    /// Driver in which every selector resolves to an interactable element.
    pub fn permissive() -> Arc<Self> {
        let driver = Self::new();
        driver.state.lock().default_behavior = Some(ElementBehavior::interactable());
        driver
    }

    pub fn add_element(&self, selector: Selector, behavior: ElementBehavior) {
        self.state
            .lock()
            .elements
            .insert(selector.to_string(), ElementRule::new(selector, behavior));
    }

    /// Clicking `selector` opens a popup page, optionally closing it again after `close_after`.
    pub fn popup_on_click(
        &self,
        selector: Selector,
        url: impl Into<String>,
        title: impl Into<String>,
        close_after: Option<Duration>,
    ) {
        self.state.lock().popups_on_click.insert(
            selector.to_string(),
            PopupScript {
                url: url.into(),
                title: title.into(),
                close_after,
            },
        );
    }

    pub fn fail_next_launches(&self, times: u32) {
        self.state.lock().launch_failures = times;
    }

    pub fn fail_close(&self, fails: bool) {
        self.state.lock().close_fails = fails;
    }

    pub fn set_navigate_delay(&self, delay: Duration) {
        self.state.lock().navigate_delay = delay;
    }

    pub fn fail_navigation(&self, url: impl Into<String>, times: u32) {
        self.state
            .lock()
            .navigation_failures
            .insert(url.into(), times);
    }

    pub fn set_load_delay(&self, delay: Duration) {
        self.state.lock().load_delay = delay;
    }

    pub fn fail_page_info(&self, fails: bool) {
        self.state.lock().page_info_fails = fails;
    }

    /// Open a new page in `session` and notify subscribers.
    pub fn spawn_popup(
        &self,
        session: &SessionHandle,
        url: impl Into<String>,
        title: impl Into<String>,
    ) -> PageHandle {
        let handle = PageHandle::new(session.clone());
        let mut state = self.state.lock();
        state.pages.insert(
            handle.id.clone(),
            PageRecord {
                handle: handle.clone(),
                info: PageInfo {
                    url: url.into(),
                    title: title.into(),
                },
                open: true,
            },
        );
        state.emit(session, PageEvent::Opened(handle.clone()));
        handle
    }

    pub fn close_page(&self, page: &PageHandle) {
        let mut state = self.state.lock();
        let closed = match state.pages.get_mut(&page.id) {
            Some(record) if record.open => {
                record.open = false;
                true
            }
            _ => false,
        };
        if closed {
            state.emit(&page.session, PageEvent::Closed(page.clone()));
        }
    }

    pub fn launch_count(&self) -> usize {
        self.state.lock().launches
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    pub fn reload_count(&self) -> usize {
        self.state.lock().reloads
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().subscribe_calls
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.state.lock().unsubscribe_calls
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .map(|record| record.subscribers.len())
            .sum()
    }

    pub fn open_sessions(&self) -> usize {
        self.state
            .lock()
            .sessions
            .values()
            .filter(|record| record.open)
            .count()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    pub fn locate_calls(&self) -> Vec<Selector> {
        self.state.lock().locates.clone()
    }

    pub fn clicks(&self) -> Vec<Selector> {
        self.state.lock().clicks.clone()
    }

    pub fn fills(&self) -> Vec<(Selector, String)> {
        self.state.lock().fills.clone()
    }

    pub fn hovers(&self) -> Vec<Selector> {
        self.state.lock().hovers.clone()
    }

    fn selector_of(&self, element: &ElementHandle) -> Selector {
        // Element ids are the selector's display form.
        self.state
            .lock()
            .elements
            .get(&element.id)
            .map(|rule| rule.selector.clone())
            .unwrap_or_else(|| Selector::Css(element.id.clone()))
    }

    fn schedule_close(&self, page: PageHandle, after: Duration) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            sleep(after).await;
            me.close_page(&page);
        });
    }
}

#[async_trait]
impl BrowserDriver for StubDriver {
    async fn launch(&self) -> Result<SessionHandle, DriverError> {
        let mut state = self.state.lock();
        state.launches += 1;
        if state.launch_failures > 0 {
            state.launch_failures -= 1;
            return Err(DriverError::new(DriverErrorKind::LaunchFailed)
                .with_hint("scripted launch failure"));
        }
        let session = SessionHandle::new();
        state.sessions.insert(
            session.clone(),
            SessionRecord {
                open: true,
                subscribers: HashMap::new(),
            },
        );
        debug!(session = %session.0, "stub session launched");
        Ok(session)
    }

    async fn new_page(&self, session: &SessionHandle) -> Result<PageHandle, DriverError> {
        let mut state = self.state.lock();
        state.ensure_session_open(session)?;
        let handle = PageHandle::new(session.clone());
        state.pages.insert(
            handle.id.clone(),
            PageRecord {
                handle: handle.clone(),
                info: PageInfo {
                    url: "about:blank".to_string(),
                    title: String::new(),
                },
                open: true,
            },
        );
        Ok(handle)
    }

    async fn navigate(
        &self,
        page: &PageHandle,
        url: &str,
        opts: NavigateOptions,
    ) -> Result<(), DriverError> {
        let delay = {
            let mut state = self.state.lock();
            state.ensure_session_open(&page.session)?;
            state.navigations.push(url.to_string());
            state.navigate_delay
        };
        if delay > opts.timeout {
            sleep(opts.timeout).await;
            return Err(DriverError::new(DriverErrorKind::NavTimeout).with_hint(url.to_string()));
        }
        if !delay.is_zero() {
            sleep(delay).await;
        }
        let mut state = self.state.lock();
        if let Some(remaining) = state.navigation_failures.get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DriverError::new(DriverErrorKind::NavFailed)
                    .with_hint(url.to_string())
                    .retriable(true));
            }
        }
        if let Some(record) = state.pages.get_mut(&page.id) {
            record.info.url = url.to_string();
            record.info.title = format!("stub: {url}");
        }
        Ok(())
    }

    async fn reload(&self, page: &PageHandle, _opts: NavigateOptions) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.ensure_session_open(&page.session)?;
        state.reloads += 1;
        Ok(())
    }

    async fn wait_for_load(
        &self,
        page: &PageHandle,
        _state: LoadState,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let delay = {
            let state = self.state.lock();
            state.ensure_session_open(&page.session)?;
            state.load_delay
        };
        if delay > timeout {
            sleep(timeout).await;
            return Err(DriverError::new(DriverErrorKind::Timeout).with_hint("page load"));
        }
        if !delay.is_zero() {
            sleep(delay).await;
        }
        Ok(())
    }

    async fn page_info(&self, page: &PageHandle) -> Result<PageInfo, DriverError> {
        let state = self.state.lock();
        if state.page_info_fails {
            return Err(DriverError::new(DriverErrorKind::Io).with_hint("scripted page_info failure"));
        }
        state
            .pages
            .get(&page.id)
            .map(|record| record.info.clone())
            .ok_or_else(|| DriverError::new(DriverErrorKind::TargetNotFound).with_hint(page.to_string()))
    }

    async fn is_open(&self, page: &PageHandle) -> Result<bool, DriverError> {
        let state = self.state.lock();
        let session_open = state
            .sessions
            .get(&page.session)
            .map(|record| record.open)
            .unwrap_or(false);
        Ok(session_open
            && state
                .pages
                .get(&page.id)
                .map(|record| record.open && record.handle == *page)
                .unwrap_or(false))
    }

    async fn locate(
        &self,
        page: &PageHandle,
        selector: &Selector,
    ) -> Result<Option<ElementHandle>, DriverError> {
        let mut state = self.state.lock();
        state.ensure_session_open(&page.session)?;
        state.locates.push(selector.clone());
        let Some(rule) = state.rule_mut(selector) else {
            return Ok(None);
        };
        rule.probes += 1;
        if rule.probes <= rule.behavior.appear_after_probes {
            return Ok(None);
        }
        Ok(Some(ElementHandle::new(page.clone(), selector.to_string())))
    }

    async fn is_interactable(&self, element: &ElementHandle) -> Result<bool, DriverError> {
        let state = self.state.lock();
        Ok(state
            .elements
            .get(&element.id)
            .map(|rule| rule.behavior.interactable)
            .unwrap_or(false))
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let selector = self.selector_of(element);
        let popup = {
            let mut state = self.state.lock();
            state.ensure_session_open(&element.page.session)?;
            if let Some(rule) = state.elements.get_mut(&element.id) {
                if rule.click_failures_left > 0 {
                    rule.click_failures_left -= 1;
                    return Err(DriverError::new(DriverErrorKind::NotInteractable)
                        .with_hint(element.id.clone()));
                }
            }
            state.clicks.push(selector);
            state.popups_on_click.get(&element.id).cloned()
        };
        if let Some(script) = popup {
            let page = self.spawn_popup(&element.page.session, script.url, script.title);
            if let Some(after) = script.close_after {
                self.schedule_close(page, after);
            }
        }
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), DriverError> {
        let selector = self.selector_of(element);
        let mut state = self.state.lock();
        state.ensure_session_open(&element.page.session)?;
        state.fills.push((selector, text.to_string()));
        Ok(())
    }

    async fn hover(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let selector = self.selector_of(element);
        let mut state = self.state.lock();
        state.ensure_session_open(&element.page.session)?;
        state.hovers.push(selector);
        Ok(())
    }

    fn subscribe_pages(&self, session: &SessionHandle) -> Result<PageSubscription, DriverError> {
        let mut state = self.state.lock();
        state.ensure_session_open(session)?;
        state.next_subscription += 1;
        state.subscribe_calls += 1;
        let id = state.next_subscription;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(record) = state.sessions.get_mut(session) {
            record.subscribers.insert(id, tx);
        }
        Ok(PageSubscription {
            id: SubscriptionId(id),
            events: rx,
        })
    }

    fn unsubscribe(&self, session: &SessionHandle, id: SubscriptionId) {
        let mut state = self.state.lock();
        state.unsubscribe_calls += 1;
        if let Some(record) = state.sessions.get_mut(session) {
            record.subscribers.remove(&id.0);
        }
    }

    async fn close(&self, session: &SessionHandle) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.closes += 1;
        if state.close_fails {
            return Err(DriverError::new(DriverErrorKind::Io).with_hint("scripted close failure"));
        }
        if let Some(record) = state.sessions.get_mut(session) {
            record.open = false;
        }
        for record in state.pages.values_mut() {
            if record.handle.session == *session {
                record.open = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn element_appears_after_configured_probes() {
        let driver = StubDriver::new();
        let selector = Selector::Css("#late".into());
        driver.add_element(selector.clone(), ElementBehavior::appearing_after(2));
        let session = driver.launch().await.unwrap();
        let page = driver.new_page(&session).await.unwrap();

        assert!(driver.locate(&page, &selector).await.unwrap().is_none());
        assert!(driver.locate(&page, &selector).await.unwrap().is_none());
        assert!(driver.locate(&page, &selector).await.unwrap().is_some());
        assert_eq!(driver.locate_calls().len(), 3);
    }

    #[tokio::test]
    async fn click_popup_reaches_subscribers() {
        let driver = StubDriver::new();
        let button = Selector::Text("Verify".into());
        driver.add_element(button.clone(), ElementBehavior::interactable());
        driver.popup_on_click(button.clone(), "https://id.example/auth", "Verify", None);
        let session = driver.launch().await.unwrap();
        let page = driver.new_page(&session).await.unwrap();
        let mut sub = driver.subscribe_pages(&session).unwrap();

        let element = driver.locate(&page, &button).await.unwrap().unwrap();
        driver.click(&element).await.unwrap();

        match sub.events.recv().await {
            Some(PageEvent::Opened(popup)) => {
                let info = driver.page_info(&popup).await.unwrap();
                assert_eq!(info.url, "https://id.example/auth");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        driver.unsubscribe(&session, sub.id);
        assert_eq!(driver.active_subscriptions(), 0);
    }

    #[test]
    fn launch_failures_are_consumed() {
        let driver = StubDriver::new();
        driver.fail_next_launches(1);
        assert!(tokio_test::block_on(driver.launch()).is_err());
        assert!(tokio_test::block_on(driver.launch()).is_ok());
        assert_eq!(driver.launch_count(), 2);
    }

    #[tokio::test]
    async fn close_marks_pages_closed() {
        let driver = StubDriver::new();
        let session = driver.launch().await.unwrap();
        let page = driver.new_page(&session).await.unwrap();
        assert!(driver.is_open(&page).await.unwrap());
        driver.close(&session).await.unwrap();
        assert!(!driver.is_open(&page).await.unwrap());
        assert_eq!(driver.open_sessions(), 0);
    }
}
