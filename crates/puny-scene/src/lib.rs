//! Host document tree for puny components.
//!
//! A small, single-threaded stand-in for a browser document: markup parsing
//! and serialization, attribute/class/style manipulation, event listeners with
//! bubbling dispatch, and node replacement.

mod document;
mod event;
pub mod markup;

pub use document::{Document, DocumentError, NodeId, NodeSnapshot};
pub use event::{Event, Listener, ListenerError};
pub use markup::{Markup, MarkupElement, MarkupError, MarkupIssue, parse_markup};
