//! Browser driver capability consumed by the timegate kernel.
//!
//! The orchestration core depends only on the [`BrowserDriver`] trait. Concrete automation
//! backends implement it out of tree; [`stub::StubDriver`] is the scriptable in-memory
//! implementation used by tests and by the CLI's stub mode.

use std::time::Duration;

use async_trait::async_trait;

pub mod stub;

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by a driver.
    #[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
    pub enum DriverErrorKind {
        #[error("browser launch failed")]
        LaunchFailed,
        #[error("session closed")]
        SessionClosed,
        #[error("navigation timed out")]
        NavTimeout,
        #[error("navigation failed")]
        NavFailed,
        #[error("operation timed out")]
        Timeout,
        #[error("target element not found")]
        TargetNotFound,
        #[error("element not interactable")]
        NotInteractable,
        #[error("driver i/o failure")]
        Io,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to higher layers.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DriverError {
        pub kind: DriverErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
    }

    impl fmt::Display for DriverError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for DriverError {}

    impl DriverError {
        pub fn new(kind: DriverErrorKind) -> Self {
            let retriable = matches!(
                kind,
                DriverErrorKind::NavTimeout
                    | DriverErrorKind::Timeout
                    | DriverErrorKind::TargetNotFound
                    | DriverErrorKind::NotInteractable
                    | DriverErrorKind::Io
            );
            Self {
                kind,
                hint: None,
                retriable,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn is_retryable(&self) -> bool {
            self.retriable
        }
    }
}

pub mod types {
    use std::fmt;

    use serde::{Deserialize, Serialize};
    use timegate_core_types::PageHandle;
    use tokio::sync::mpsc;

    /// Element-finding strategy understood by every driver.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Selector {
        Css(String),
        Text(String),
        Role { role: String, name: String },
        Xpath(String),
    }

    impl fmt::Display for Selector {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Selector::Css(css) => write!(f, "css={css}"),
                Selector::Text(text) => write!(f, "text={text}"),
                Selector::Role { role, name } => write!(f, "role={role}[name={name}]"),
                Selector::Xpath(xpath) => write!(f, "xpath={xpath}"),
            }
        }
    }

    /// Load milestones a driver can wait for.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum LoadState {
        DomContentLoaded,
        #[default]
        Load,
        NetworkIdle,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct NavigateOptions {
        pub wait_until: LoadState,
        pub timeout: std::time::Duration,
    }

    impl Default for NavigateOptions {
        fn default() -> Self {
            Self {
                wait_until: LoadState::Load,
                timeout: std::time::Duration::from_secs(30),
            }
        }
    }

    #[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PageInfo {
        pub url: String,
        pub title: String,
    }

    /// Page lifecycle notifications delivered to subscribers.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum PageEvent {
        Opened(PageHandle),
        Closed(PageHandle),
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SubscriptionId(pub u64);

    /// Live page-event subscription. The holder must hand `id` back to
    /// [`crate::BrowserDriver::unsubscribe`] exactly once.
    #[derive(Debug)]
    pub struct PageSubscription {
        pub id: SubscriptionId,
        pub events: mpsc::UnboundedReceiver<PageEvent>,
    }
}

pub use error::{DriverError, DriverErrorKind};
pub use timegate_core_types::{ElementHandle, PageHandle, SessionHandle};
pub use types::{
    LoadState, NavigateOptions, PageEvent, PageInfo, PageSubscription, Selector, SubscriptionId,
};

/// Minimal browser capability surface required by the orchestration core.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self) -> Result<SessionHandle, DriverError>;

    async fn new_page(&self, session: &SessionHandle) -> Result<PageHandle, DriverError>;

    async fn navigate(
        &self,
        page: &PageHandle,
        url: &str,
        opts: NavigateOptions,
    ) -> Result<(), DriverError>;

    async fn reload(&self, page: &PageHandle, opts: NavigateOptions) -> Result<(), DriverError>;

    async fn wait_for_load(
        &self,
        page: &PageHandle,
        state: LoadState,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    async fn page_info(&self, page: &PageHandle) -> Result<PageInfo, DriverError>;

    async fn is_open(&self, page: &PageHandle) -> Result<bool, DriverError>;

    async fn locate(
        &self,
        page: &PageHandle,
        selector: &Selector,
    ) -> Result<Option<ElementHandle>, DriverError>;

    /// Whether the element is visible and accepts input right now.
    async fn is_interactable(&self, element: &ElementHandle) -> Result<bool, DriverError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError>;

    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<(), DriverError>;

    async fn hover(&self, element: &ElementHandle) -> Result<(), DriverError>;

    fn subscribe_pages(&self, session: &SessionHandle) -> Result<PageSubscription, DriverError>;

    fn unsubscribe(&self, session: &SessionHandle, id: SubscriptionId);

    async fn close(&self, session: &SessionHandle) -> Result<(), DriverError>;
}
