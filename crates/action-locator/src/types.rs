//! Candidate and resolution types

use browser_driver::{ElementHandle, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One alternative way of finding an element.
///
/// Deserialises from a bare selector map (`{css: "#go"}`) or a labelled form
/// (`{label: "submit", selector: {css: "#go"}}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocatorSpec {
    Labelled {
        label: String,
        selector: Selector,
    },
    Bare(Selector),
}

impl LocatorSpec {
    pub fn new(selector: Selector) -> Self {
        LocatorSpec::Bare(selector)
    }

    pub fn labelled(label: impl Into<String>, selector: Selector) -> Self {
        LocatorSpec::Labelled {
            label: label.into(),
            selector,
        }
    }

    pub fn css(css: impl Into<String>) -> Self {
        Self::new(Selector::Css(css.into()))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Selector::Text(text.into()))
    }

    pub fn selector(&self) -> &Selector {
        match self {
            LocatorSpec::Labelled { selector, .. } | LocatorSpec::Bare(selector) => selector,
        }
    }

    /// Human-readable name used in logs and errors.
    pub fn label(&self) -> String {
        match self {
            LocatorSpec::Labelled { label, .. } => label.clone(),
            LocatorSpec::Bare(selector) => selector.to_string(),
        }
    }
}

impl fmt::Display for LocatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl From<Selector> for LocatorSpec {
    fn from(selector: Selector) -> Self {
        LocatorSpec::Bare(selector)
    }
}

/// Winning candidate of a resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub element: ElementHandle,
    /// Position of the winning candidate in the declared list.
    pub index: usize,
    pub label: String,
}
