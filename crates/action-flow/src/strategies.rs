//! Recovery actions run between attempts

use async_trait::async_trait;
use browser_driver::{BrowserDriver, NavigateOptions, PageHandle};
use std::sync::Arc;
use tracing::{debug, warn};

/// Recovery run before the next attempt
#[async_trait]
pub trait Recovery: Send + Sync {
    /// `failed_attempt` is the 1-based attempt that just failed
    async fn recover(&self, failed_attempt: u32);
}

/// Does nothing between attempts
pub struct NoRecovery;

#[async_trait]
impl Recovery for NoRecovery {
    async fn recover(&self, _failed_attempt: u32) {}
}

/// Reloads the page so the next attempt sees a fresh view
pub struct ReloadRecovery {
    driver: Arc<dyn BrowserDriver>,
    page: PageHandle,
    opts: NavigateOptions,
}

impl ReloadRecovery {
    pub fn new(driver: Arc<dyn BrowserDriver>, page: PageHandle, opts: NavigateOptions) -> Self {
        Self { driver, page, opts }
    }
}

#[async_trait]
impl Recovery for ReloadRecovery {
    async fn recover(&self, failed_attempt: u32) {
        debug!(page = %self.page, failed_attempt, "reloading before next attempt");
        if let Err(err) = self.driver.reload(&self.page, self.opts).await {
            warn!(page = %self.page, error = %err, "recovery reload failed");
        }
    }
}
