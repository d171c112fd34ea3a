//! Element resolver with ordered fallback

use crate::{errors::LocatorError, types::*};
use async_trait::async_trait;
use browser_driver::{BrowserDriver, PageHandle};
use std::sync::Arc;
use tracing::{debug, warn};

/// Element resolver trait
#[async_trait]
pub trait ElementResolver: Send + Sync {
    /// Resolve the first interactable candidate in declaration order
    async fn resolve(
        &self,
        page: &PageHandle,
        candidates: &[LocatorSpec],
    ) -> Result<Resolution, LocatorError>;
}

/// Resolver backed by a [`BrowserDriver`].
pub struct CandidateLocator {
    driver: Arc<dyn BrowserDriver>,
}

impl CandidateLocator {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl ElementResolver for CandidateLocator {
    async fn resolve(
        &self,
        page: &PageHandle,
        candidates: &[LocatorSpec],
    ) -> Result<Resolution, LocatorError> {
        if candidates.is_empty() {
            return Err(LocatorError::NoCandidates);
        }

        let mut last_driver_error = None;
        let mut any_driver_success = false;
        for (index, spec) in candidates.iter().enumerate() {
            let found = match self.driver.locate(page, spec.selector()).await {
                Ok(found) => found,
                Err(err) => {
                    warn!(candidate = %spec, error = %err, "locate failed; trying next candidate");
                    last_driver_error = Some(err);
                    continue;
                }
            };
            let Some(element) = found else {
                any_driver_success = true;
                debug!(candidate = %spec, "no match");
                continue;
            };
            match self.driver.is_interactable(&element).await {
                Ok(true) => {
                    debug!(candidate = %spec, index, "resolved");
                    return Ok(Resolution {
                        element,
                        index,
                        label: spec.label(),
                    });
                }
                Ok(false) => {
                    any_driver_success = true;
                    debug!(candidate = %spec, "present but not interactable");
                }
                Err(err) => {
                    warn!(candidate = %spec, error = %err, "interactability probe failed");
                    last_driver_error = Some(err);
                }
            }
        }

        match last_driver_error {
            Some(err) if !any_driver_success => Err(LocatorError::Driver(err)),
            _ => Err(LocatorError::ElementNotFound {
                tried: candidates
                    .iter()
                    .map(LocatorSpec::label)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}
