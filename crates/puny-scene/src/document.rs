//! Arena-backed document tree.
//!
//! Nodes live in a slot arena addressed by generational `NodeId`s, so an id
//! that outlives its node (after `replace_node` or `remove_node`) is detected
//! instead of aliasing a newer node. `Document` is a cheap-clone handle; every
//! operation borrows the tree only for its own duration, which lets listeners
//! mutate the document while an event is being dispatched.

use crate::event::{Event, Listener, ListenerError};
use crate::markup::{self, Markup, MarkupError, escape_attribute, escape_text, is_void_element};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId {
    pub index: u32,
    pub generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentError {
    StaleNode(NodeId),
    NotAnElement(NodeId),
    NotAChild { parent: NodeId, child: NodeId },
}

impl fmt::Display for DocumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::StaleNode(node) => write!(f, "node {node} is no longer part of the document"),
            Self::NotAnElement(node) => write!(f, "node {node} is not an element"),
            Self::NotAChild { parent, child } => {
                write!(f, "node {child} is not a child of {parent}")
            }
        }
    }
}

impl std::error::Error for DocumentError {}

/// Structural view of a subtree, used for comparisons and JSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeSnapshot {
    Element {
        tag: String,
        attributes: IndexMap<String, String>,
        classes: Vec<String>,
        styles: IndexMap<String, String>,
        listeners: Vec<String>,
        children: Vec<NodeSnapshot>,
    },
    Text {
        text: String,
    },
}

#[derive(Default)]
struct Element {
    tag: String,
    // `class` and `style` keep their position here; their values come from
    // `classes` and `styles` on output.
    attributes: IndexMap<String, String>,
    classes: Vec<String>,
    styles: IndexMap<String, String>,
}

enum NodeData {
    Element(Element),
    Text(String),
}

struct NodeEntry {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    data: NodeData,
    listeners: Vec<(String, Listener)>,
}

struct Slot {
    generation: u32,
    entry: Option<NodeEntry>,
}

struct Tree {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    body: NodeId,
}

impl Tree {
    fn insert(&mut self, data: NodeData) -> NodeId {
        let entry = NodeEntry {
            parent: None,
            children: Vec::new(),
            data,
            listeners: Vec::new(),
        };
        match self.free_list.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation += 1;
                slot.entry = Some(entry);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn get(&self, node: NodeId) -> Result<&NodeEntry, DocumentError> {
        self.slots
            .get(node.index as usize)
            .filter(|slot| slot.generation == node.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or(DocumentError::StaleNode(node))
    }

    fn get_mut(&mut self, node: NodeId) -> Result<&mut NodeEntry, DocumentError> {
        self.slots
            .get_mut(node.index as usize)
            .filter(|slot| slot.generation == node.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or(DocumentError::StaleNode(node))
    }

    fn element_mut(&mut self, node: NodeId) -> Result<&mut Element, DocumentError> {
        match &mut self.get_mut(node)?.data {
            NodeData::Element(element) => Ok(element),
            NodeData::Text(_) => Err(DocumentError::NotAnElement(node)),
        }
    }

    fn detach(&mut self, node: NodeId) -> Result<(), DocumentError> {
        let parent = self.get(node)?.parent;
        if let Some(parent) = parent {
            self.get_mut(parent)?.children.retain(|child| *child != node);
            self.get_mut(node)?.parent = None;
        }
        Ok(())
    }

    fn free(&mut self, node: NodeId) -> Result<(), DocumentError> {
        let entry = self.get(node)?;
        let children = entry.children.clone();
        for child in children {
            self.free(child)?;
        }
        self.slots[node.index as usize].entry = None;
        self.free_list.push(node.index);
        Ok(())
    }

    fn append(&mut self, parent: NodeId, child: NodeId) -> Result<(), DocumentError> {
        self.element_mut(parent)?;
        self.detach(child)?;
        self.get_mut(parent)?.children.push(child);
        self.get_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn build(&mut self, markup: &Markup) -> NodeId {
        match markup {
            Markup::Text(text) => self.insert(NodeData::Text(text.clone())),
            Markup::Element(source) => {
                let mut element = Element {
                    tag: source.tag.clone(),
                    ..Element::default()
                };
                for (name, value) in &source.attributes {
                    element.set_attribute(name, value);
                }
                let node = self.insert(NodeData::Element(element));
                for child in &source.children {
                    let child = self.build(child);
                    // Freshly inserted nodes cannot be stale.
                    let _ = self.append(node, child);
                }
                node
            }
        }
    }

    fn write_html(&self, node: NodeId, output: &mut String) {
        let Ok(entry) = self.get(node) else {
            return;
        };
        match &entry.data {
            NodeData::Text(text) => output.push_str(&escape_text(text)),
            NodeData::Element(element) => {
                output.push('<');
                output.push_str(&element.tag);
                for name in element.attributes.keys() {
                    let value = element.attribute(name).unwrap_or_default();
                    if value.is_empty() && (name == "class" || name == "style") {
                        continue;
                    }
                    output.push(' ');
                    output.push_str(name);
                    if !value.is_empty() {
                        output.push_str("=\"");
                        output.push_str(&escape_attribute(&value));
                        output.push('"');
                    }
                }
                output.push('>');
                if is_void_element(&element.tag) {
                    return;
                }
                for child in &entry.children {
                    self.write_html(*child, output);
                }
                output.push_str("</");
                output.push_str(&element.tag);
                output.push('>');
            }
        }
    }

    fn write_text(&self, node: NodeId, output: &mut String) {
        let Ok(entry) = self.get(node) else {
            return;
        };
        match &entry.data {
            NodeData::Text(text) => output.push_str(text),
            NodeData::Element(_) => {
                for child in &entry.children {
                    self.write_text(*child, output);
                }
            }
        }
    }

    fn snapshot(&self, node: NodeId) -> Option<NodeSnapshot> {
        let entry = self.get(node).ok()?;
        Some(match &entry.data {
            NodeData::Text(text) => NodeSnapshot::Text { text: text.clone() },
            NodeData::Element(element) => NodeSnapshot::Element {
                tag: element.tag.clone(),
                attributes: element
                    .attributes
                    .keys()
                    .filter(|name| *name != "class" && *name != "style")
                    .map(|name| (name.clone(), element.attributes[name].clone()))
                    .collect(),
                classes: element.classes.clone(),
                styles: element.styles.clone(),
                listeners: entry.listeners.iter().map(|(name, _)| name.clone()).collect(),
                children: entry
                    .children
                    .iter()
                    .filter_map(|child| self.snapshot(*child))
                    .collect(),
            },
        })
    }

    fn find(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        let entry = self.get(node).ok()?;
        if let NodeData::Element(element) = &entry.data {
            if selector.matches(element) {
                return Some(node);
            }
        }
        entry
            .children
            .iter()
            .find_map(|child| self.find(*child, selector))
    }
}

impl Element {
    fn set_attribute(&mut self, name: &str, value: &str) {
        match name {
            "class" => {
                self.classes = value.split_whitespace().map(str::to_string).collect();
            }
            "style" => {
                self.styles = value
                    .split(';')
                    .filter_map(|declaration| declaration.split_once(':'))
                    .map(|(property, value)| {
                        (property.trim().to_string(), value.trim().to_string())
                    })
                    .filter(|(property, _)| !property.is_empty())
                    .collect();
            }
            _ => {}
        }
        self.attributes.insert(name.to_string(), value.to_string());
    }

    fn attribute(&self, name: &str) -> Option<String> {
        if !self.attributes.contains_key(name) {
            return None;
        }
        Some(match name {
            "class" => self.classes.join(" "),
            "style" => self
                .styles
                .iter()
                .map(|(property, value)| format!("{property}: {value};"))
                .collect::<Vec<_>>()
                .join(" "),
            _ => self.attributes[name].clone(),
        })
    }
}

enum Selector {
    Id(String),
    Class(String),
    Tag(String),
}

impl Selector {
    fn parse(selector: &str) -> Self {
        let selector = selector.trim();
        if let Some(id) = selector.strip_prefix('#') {
            Self::Id(id.to_string())
        } else if let Some(class) = selector.strip_prefix('.') {
            Self::Class(class.to_string())
        } else {
            Self::Tag(selector.to_ascii_lowercase())
        }
    }

    fn matches(&self, element: &Element) -> bool {
        match self {
            Self::Id(id) => element.attributes.get("id") == Some(id),
            Self::Class(class) => element.classes.contains(class),
            Self::Tag(tag) => element.tag == *tag,
        }
    }
}

fn kebab_case(property: &str) -> String {
    let mut output = String::with_capacity(property.len() + 4);
    for character in property.chars() {
        if character.is_ascii_uppercase() {
            output.push('-');
            output.push(character.to_ascii_lowercase());
        } else {
            output.push(character);
        }
    }
    output
}

#[derive(Clone)]
pub struct Document {
    tree: Rc<RefCell<Tree>>,
}

impl Document {
    pub fn new() -> Self {
        let mut tree = Tree {
            slots: Vec::new(),
            free_list: Vec::new(),
            body: NodeId {
                index: 0,
                generation: 0,
            },
        };
        tree.body = tree.insert(NodeData::Element(Element {
            tag: "body".to_string(),
            ..Element::default()
        }));
        Self {
            tree: Rc::new(RefCell::new(tree)),
        }
    }

    /// Creates a document whose body holds the parsed markup.
    pub fn parse(source: &str) -> Result<Self, MarkupError> {
        let nodes = markup::parse_markup(source)?;
        let document = Self::new();
        {
            let mut tree = document.tree.borrow_mut();
            let body = tree.body;
            for node in &nodes {
                let node = tree.build(node);
                // Both ends were just created.
                let _ = tree.append(body, node);
            }
        }
        Ok(document)
    }

    pub fn body(&self) -> NodeId {
        self.tree.borrow().body
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.tree.borrow_mut().insert(NodeData::Element(Element {
            tag: tag.to_ascii_lowercase(),
            ..Element::default()
        }))
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.tree.borrow_mut().insert(NodeData::Text(text.to_string()))
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DocumentError> {
        self.tree.borrow_mut().append(parent, child)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.tree
            .borrow()
            .get(node)
            .map(|entry| entry.children.clone())
            .unwrap_or_default()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.tree.borrow().get(node).ok()?.parent
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.tree.borrow().get(node).is_ok()
    }

    /// Whether `node` is reachable from the body.
    pub fn is_attached(&self, node: NodeId) -> bool {
        let tree = self.tree.borrow();
        let mut current = Some(node);
        while let Some(node) = current {
            if node == tree.body {
                return true;
            }
            current = tree.get(node).ok().and_then(|entry| entry.parent);
        }
        false
    }

    pub fn tag(&self, node: NodeId) -> Option<String> {
        match &self.tree.borrow().get(node).ok()?.data {
            NodeData::Element(element) => Some(element.tag.clone()),
            NodeData::Text(_) => None,
        }
    }

    /// Data of a text node.
    pub fn text(&self, node: NodeId) -> Option<String> {
        match &self.tree.borrow().get(node).ok()?.data {
            NodeData::Text(text) => Some(text.clone()),
            NodeData::Element(_) => None,
        }
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut output = String::new();
        self.tree.borrow().write_text(node, &mut output);
        output
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), DocumentError> {
        self.tree.borrow_mut().element_mut(node)?.set_attribute(name, value);
        Ok(())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.tree.borrow().get(node).ok()?.data {
            NodeData::Element(element) => element.attribute(name),
            NodeData::Text(_) => None,
        }
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) -> Result<(), DocumentError> {
        let mut tree = self.tree.borrow_mut();
        let element = tree.element_mut(node)?;
        element.attributes.shift_remove(name);
        match name {
            "class" => element.classes.clear(),
            "style" => element.styles.clear(),
            _ => {}
        }
        Ok(())
    }

    pub fn add_class(&self, node: NodeId, class: &str) -> Result<(), DocumentError> {
        let mut tree = self.tree.borrow_mut();
        let element = tree.element_mut(node)?;
        if !element.classes.iter().any(|existing| existing == class) {
            element.classes.push(class.to_string());
        }
        element.attributes.entry("class".to_string()).or_default();
        Ok(())
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.classes(node).iter().any(|existing| existing == class)
    }

    pub fn classes(&self, node: NodeId) -> Vec<String> {
        match self.tree.borrow().get(node).map(|entry| &entry.data) {
            Ok(NodeData::Element(element)) => element.classes.clone(),
            _ => Vec::new(),
        }
    }

    /// Sets one style property; `None` removes it. Property names may be
    /// given in camelCase (`fontSize`) or kebab-case (`font-size`).
    pub fn set_style(&self, node: NodeId, property: &str, value: Option<&str>) -> Result<(), DocumentError> {
        let mut tree = self.tree.borrow_mut();
        let element = tree.element_mut(node)?;
        let property = kebab_case(property);
        match value {
            Some(value) => {
                element.styles.insert(property, value.to_string());
                element.attributes.entry("style".to_string()).or_default();
            }
            None => {
                element.styles.shift_remove(&property);
            }
        }
        Ok(())
    }

    pub fn style(&self, node: NodeId, property: &str) -> Option<String> {
        match &self.tree.borrow().get(node).ok()?.data {
            NodeData::Element(element) => element.styles.get(&kebab_case(property)).cloned(),
            NodeData::Text(_) => None,
        }
    }

    pub fn add_event_listener(&self, node: NodeId, event: &str, listener: Listener) -> Result<(), DocumentError> {
        let mut tree = self.tree.borrow_mut();
        tree.element_mut(node)?;
        tree.get_mut(node)?.listeners.push((event.to_string(), listener));
        Ok(())
    }

    pub fn listener_count(&self, node: NodeId, event: &str) -> usize {
        self.tree
            .borrow()
            .get(node)
            .map(|entry| entry.listeners.iter().filter(|(name, _)| name == event).count())
            .unwrap_or_default()
    }

    /// Runs the listeners of `node` and then of each ancestor for `event`.
    ///
    /// Returns how many listeners ran. The tree is not borrowed while a
    /// listener runs; the first listener error stops the dispatch.
    pub fn dispatch_event(&self, node: NodeId, mut event: Event) -> Result<usize, ListenerError> {
        event.target = Some(node);
        let listeners = {
            let tree = self.tree.borrow();
            tree.get(node)?;
            let mut listeners = Vec::new();
            let mut current = Some(node);
            while let Some(node) = current {
                let Ok(entry) = tree.get(node) else {
                    break;
                };
                listeners.extend(
                    entry
                        .listeners
                        .iter()
                        .filter(|(name, _)| *name == event.name)
                        .map(|(_, listener)| listener.clone()),
                );
                current = entry.parent;
            }
            listeners
        };
        log::trace!("dispatching {} on {node} to {} listener(s)", event.name, listeners.len());
        for listener in &listeners {
            listener(&event)?;
        }
        Ok(listeners.len())
    }

    /// Puts `new` at the position of `old` and frees `old` with its subtree.
    pub fn replace_node(&self, old: NodeId, new: NodeId) -> Result<(), DocumentError> {
        let mut tree = self.tree.borrow_mut();
        tree.get(new)?;
        tree.detach(new)?;
        let parent = tree.get(old)?.parent;
        if let Some(parent) = parent {
            let position = tree
                .get(parent)?
                .children
                .iter()
                .position(|child| *child == old)
                .ok_or(DocumentError::NotAChild { parent, child: old })?;
            tree.get_mut(parent)?.children[position] = new;
            tree.get_mut(new)?.parent = Some(parent);
            tree.get_mut(old)?.parent = None;
        } else {
            log::warn!("replacing {old}, which has no parent; {new} stays detached");
        }
        log::trace!("replaced {old} with {new}");
        tree.free(old)
    }

    pub fn remove_node(&self, node: NodeId) -> Result<(), DocumentError> {
        let mut tree = self.tree.borrow_mut();
        tree.detach(node)?;
        tree.free(node)
    }

    /// First element in document order matching `#id`, `.class` or `tag`.
    pub fn query_selector(&self, selector: &str) -> Option<NodeId> {
        let tree = self.tree.borrow();
        tree.find(tree.body, &Selector::parse(selector))
    }

    pub fn outer_html(&self, node: NodeId) -> String {
        let mut output = String::new();
        self.tree.borrow().write_html(node, &mut output);
        output
    }

    pub fn inner_html(&self, node: NodeId) -> String {
        let tree = self.tree.borrow();
        let mut output = String::new();
        if let Ok(entry) = tree.get(node) {
            for child in &entry.children {
                tree.write_html(*child, &mut output);
            }
        }
        output
    }

    pub fn snapshot(&self, node: NodeId) -> Option<NodeSnapshot> {
        self.tree.borrow().snapshot(node)
    }

    /// Number of live nodes, the body included.
    pub fn node_count(&self) -> usize {
        let tree = self.tree.borrow();
        tree.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.node_count())
            .finish()
    }
}
