use std::sync::Arc;
use std::time::Duration;

use browser_driver::{
    BrowserDriver, LoadState, PageEvent, PageHandle, PageInfo, PageSubscription, SessionHandle,
    SubscriptionId,
};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::classifier::PopupClassifier;
use crate::errors::PopupError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopupMatch {
    pub page: PageHandle,
    pub info: PageInfo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PopupOutcome {
    Accepted(PopupMatch),
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    TimedOut,
}

/// Owns a page subscription; unsubscribes on drop.
struct SubscriptionGuard {
    driver: Arc<dyn BrowserDriver>,
    session: SessionHandle,
    id: SubscriptionId,
    events: mpsc::UnboundedReceiver<PageEvent>,
}

impl SubscriptionGuard {
    fn acquire(driver: &Arc<dyn BrowserDriver>, session: &SessionHandle) -> Result<Self, PopupError> {
        let PageSubscription { id, events } = driver.subscribe_pages(session)?;
        Ok(Self {
            driver: Arc::clone(driver),
            session: session.clone(),
            id,
            events,
        })
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.driver.unsubscribe(&self.session, self.id);
        debug!(subscription = self.id.0, "page subscription released");
    }
}

/// A live subscription to new pages of one session.
///
/// Pages opened after [`PopupWatcher::watch`] returns are buffered until
/// [`PopupWatch::wait`] consumes them. Dropping the watch unsubscribes.
pub struct PopupWatch {
    guard: SubscriptionGuard,
    load_timeout: Duration,
}

impl PopupWatch {
    /// Waits for a new page that `classifier` accepts.
    ///
    /// Candidates that never reach a stable load are skipped. A failure to read
    /// page info is returned as an error.
    pub async fn wait(
        mut self,
        classifier: &PopupClassifier,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PopupOutcome, PopupError> {
        let driver = Arc::clone(&self.guard.driver);
        let deadline = Instant::now() + timeout;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(PopupError::Cancelled),
                _ = sleep_until(deadline) => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "no popup before timeout");
                    return Ok(PopupOutcome::TimedOut);
                }
                event = self.guard.events.recv() => event,
            };
            let page = match event {
                Some(PageEvent::Opened(page)) => page,
                Some(PageEvent::Closed(_)) => continue,
                None => return Err(PopupError::SubscriptionClosed),
            };

            let budget = deadline
                .saturating_duration_since(Instant::now())
                .min(self.load_timeout);
            let loaded = tokio::select! {
                _ = cancel.cancelled() => return Err(PopupError::Cancelled),
                loaded = driver.wait_for_load(&page, LoadState::Load, budget) => loaded,
            };
            if let Err(err) = loaded {
                debug!(%page, error = %err, "candidate never settled; ignoring");
                continue;
            }

            let info = driver.page_info(&page).await?;
            if classifier.matches(&info) {
                info!(%page, url = %info.url, "popup accepted");
                return Ok(PopupOutcome::Accepted(PopupMatch { page, info }));
            }
            debug!(%page, url = %info.url, "popup ignored");
        }
    }
}

pub struct PopupWatcher {
    driver: Arc<dyn BrowserDriver>,
    load_timeout: Duration,
    close_poll: Duration,
}

impl PopupWatcher {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            driver,
            load_timeout: Duration::from_secs(10),
            close_poll: Duration::from_millis(500),
        }
    }

    pub fn with_load_timeout(mut self, load_timeout: Duration) -> Self {
        self.load_timeout = load_timeout;
        self
    }

    /// Interval at which `wait_for_close` re-checks the page in case a close
    /// event is never delivered.
    pub fn with_close_poll(mut self, close_poll: Duration) -> Self {
        self.close_poll = close_poll;
        self
    }

    /// Subscribes to new pages of `session` right away.
    pub fn watch(&self, session: &SessionHandle) -> Result<PopupWatch, PopupError> {
        Ok(PopupWatch {
            guard: SubscriptionGuard::acquire(&self.driver, session)?,
            load_timeout: self.load_timeout,
        })
    }

    /// Waits for a new page in `session` that `classifier` accepts.
    pub async fn wait_for_popup(
        &self,
        session: &SessionHandle,
        classifier: &PopupClassifier,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PopupOutcome, PopupError> {
        self.watch(session)?.wait(classifier, timeout, cancel).await
    }

    /// Waits for `popup` to close. Exceeding `timeout` is reported, not raised.
    pub async fn wait_for_close(
        &self,
        popup: &PageHandle,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CloseOutcome, PopupError> {
        let mut guard = SubscriptionGuard::acquire(&self.driver, &popup.session)?;
        if !self.driver.is_open(popup).await? {
            return Ok(CloseOutcome::Closed);
        }
        let deadline = Instant::now() + timeout;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(PopupError::Cancelled),
                _ = sleep_until(deadline) => return Ok(CloseOutcome::TimedOut),
                event = guard.events.recv() => match event {
                    Some(PageEvent::Closed(page)) if page == *popup => {
                        return Ok(CloseOutcome::Closed);
                    }
                    Some(_) => {}
                    // the session itself went away
                    None => return Ok(CloseOutcome::Closed),
                },
                _ = sleep(self.close_poll) => {
                    if !self.driver.is_open(popup).await? {
                        return Ok(CloseOutcome::Closed);
                    }
                }
            }
        }
    }
}
