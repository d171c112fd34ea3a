//! Popup detection for out-of-band verification flows.
//!
//! Every wait owns its page subscription through a guard that unsubscribes
//! exactly once, whichever way the wait ends.

pub mod classifier;
pub mod errors;
pub mod watcher;

pub use classifier::PopupClassifier;
pub use errors::PopupError;
pub use watcher::{CloseOutcome, PopupMatch, PopupOutcome, PopupWatch, PopupWatcher};
