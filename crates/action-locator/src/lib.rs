//! Ordered-candidate locator
//!
//! A prioritised list of alternative element-finding strategies is evaluated
//! top to bottom. The first candidate that resolves to a visible, interactable
//! element wins. Ties are broken by declaration order, never by DOM order.

pub mod errors;
pub mod resolver;
pub mod types;

pub use errors::*;
pub use resolver::*;
pub use types::*;
