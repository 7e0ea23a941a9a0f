//! Puny: a minimal reactive templating engine.
//!
//! Templates are markup annotated with `v-if`, `v-for`, `v-bind:class`,
//! `v-bind:style`, `@event` and `{{ }}` interpolation. A [`Component`] compiles
//! its template once, renders it into a [`puny_scene::Document`], and renders
//! again, debounced, whenever a data field changes.
//!
//! ```no_run
//! use puny::{Component, VirtualClock};
//! use puny_scene::Document;
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let document = Document::parse(r#"<div id="app"></div>"#)?;
//! let clock = Rc::new(VirtualClock::new());
//! let component = Component::builder(&document, "#app", clock.clone())
//!     .template(r#"<p v-bind:class="{busy: busy}">{{ word }}</p>"#)
//!     .data(json!({"word": "pen", "busy": false}))
//!     .build()?;
//! component.set("word", json!("ink"))?;
//! clock.run_until_idle();
//! assert_eq!(document.text_content(component.root()), "ink");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod component;
pub mod directive;
mod error;
pub mod expression;
pub mod render;
mod scheduler;
pub mod scope;
mod store;
pub mod template;

pub use component::{Component, ComponentBuilder, Computed, Method, MountTarget, RenderHook};
pub use error::{
    CompileError, CompileErrorKind, Error, MountError, ResolutionError, ResolutionKind, StructuralError,
};
pub use expression::{CompiledExpression, compile};
pub use scheduler::{DEFAULT_INTERVAL, Scheduler, Timer, VirtualClock};
pub use scope::{Frame, Resolver, ScopeChain};
pub use store::{Store, Write, is_private};
