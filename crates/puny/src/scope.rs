//! Lexical scopes for template evaluation.
//!
//! A [`ScopeChain`] is the list of loop frames active at one point of a render
//! pass. Names not bound by any frame fall through to a [`Resolver`], which for
//! a mounted component is its data store followed by its computed fields.

use serde_json::Value;
use smallvec::SmallVec;
use std::rc::Rc;

/// One immutable layer of bindings, created per loop iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    bindings: SmallVec<[(String, Value); 2]>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        match self.bindings.iter_mut().find(|(bound, _)| *bound == name) {
            Some((_, slot)) => *slot = value,
            None => self.bindings.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings
            .iter()
            .find_map(|(bound, value)| (bound == name).then_some(value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(name, _)| name.as_str())
    }
}

/// Frames searched innermost first. Cloning is cheap: frames are shared, so a
/// chain can be captured by an event binding without copying loop values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeChain {
    // Stored outermost first so push/pop work at the end.
    frames: Vec<Rc<Frame>>,
}

impl ScopeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(Rc::new(frame));
    }

    pub fn pop(&mut self) -> Option<Rc<Frame>> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Frames innermost first.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev().map(Rc::as_ref)
    }
}

/// Builds a chain from frames listed innermost first.
impl From<Vec<Frame>> for ScopeChain {
    fn from(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into_iter().rev().map(Rc::new).collect(),
        }
    }
}

/// Fallback for names no frame binds.
pub trait Resolver {
    fn resolve(&self, name: &str) -> Option<Value>;
}

/// Resolves nothing; evaluation against frames alone.
impl Resolver for () {
    fn resolve(&self, _name: &str) -> Option<Value> {
        None
    }
}

impl Resolver for serde_json::Map<String, Value> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl<R: Resolver + ?Sized> Resolver for &R {
    fn resolve(&self, name: &str) -> Option<Value> {
        (**self).resolve(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn innermost_frame_shadows_outer_ones() {
        let mut chain = ScopeChain::new();
        chain.push(Frame::new().with("item", json!("outer")).with("index", json!(0)));
        chain.push(Frame::new().with("item", json!("inner")));

        assert_eq!(chain.lookup("item"), Some(&json!("inner")));
        assert_eq!(chain.lookup("index"), Some(&json!(0)));
        assert_eq!(chain.lookup("missing"), None);

        chain.pop();
        assert_eq!(chain.lookup("item"), Some(&json!("outer")));
    }

    #[test]
    fn from_vec_takes_innermost_first() {
        let chain = ScopeChain::from(vec![
            Frame::new().with("x", json!(1)),
            Frame::new().with("x", json!(2)).with("y", json!(3)),
        ]);
        assert_eq!(chain.lookup("x"), Some(&json!(1)));
        assert_eq!(chain.lookup("y"), Some(&json!(3)));
        assert_eq!(chain.frames().next().and_then(|frame| frame.get("x")), Some(&json!(1)));
    }

    #[test]
    fn rebinding_a_name_in_one_frame_replaces_it() {
        let frame = Frame::new().with("a", json!(1)).with("a", json!(2));
        assert_eq!(frame.names().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(frame.get("a"), Some(&json!(2)));
    }

    #[test]
    fn captured_chains_are_unaffected_by_later_pops() {
        let mut chain = ScopeChain::new();
        chain.push(Frame::new().with("row", json!(7)));
        let captured = chain.clone();
        chain.pop();
        assert!(chain.is_empty());
        assert_eq!(captured.lookup("row"), Some(&json!(7)));
    }
}
