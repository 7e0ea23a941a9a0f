//! Materializes a compiled [`Template`] into document nodes.
//!
//! Each element is processed in a fixed order: condition, iteration, class
//! mapping, style mapping, event listeners, then children (with text
//! interpolation). A render builds a completely new detached tree; the caller
//! swaps it into the document.

use crate::error::{Error, StructuralError};
use crate::expression::{CompiledExpression, display, truthy, type_name};
use crate::scope::{Frame, Resolver, ScopeChain};
use crate::template::{Action, Argument, ElementTemplate, Mapping, Template, TemplateNode, TextSegment};
use puny_scene::{Document, Listener, NodeId};
use serde_json::Value;
use std::rc::Rc;

/// An action list bound to one rendered element.
#[derive(Debug, Clone)]
pub struct BoundHandler {
    pub event: String,
    pub actions: Vec<BoundAction>,
}

#[derive(Debug, Clone)]
pub enum BoundAction {
    /// `value` is evaluated when the event fires, against component data only.
    Assign {
        target: String,
        value: Rc<CompiledExpression>,
    },
    Invoke {
        method: String,
        arguments: Vec<BoundArgument>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundArgument {
    Event,
    /// Captured when the listener was attached.
    Value(Value),
}

/// Turns bound handlers into document listeners.
pub trait EventSink {
    fn listener(&self, handler: BoundHandler) -> Listener;
}

pub struct Renderer<'a> {
    document: &'a Document,
    resolver: &'a dyn Resolver,
    sink: &'a dyn EventSink,
}

impl<'a> Renderer<'a> {
    pub fn new(document: &'a Document, resolver: &'a dyn Resolver, sink: &'a dyn EventSink) -> Self {
        Self {
            document,
            resolver,
            sink,
        }
    }

    /// Renders the template to exactly one detached node.
    pub fn render(&self, template: &Template) -> Result<NodeId, Error> {
        let mut chain = ScopeChain::new();
        let mut roots = Vec::new();
        for root in &template.roots {
            if let Err(error) = self.render_element(root, &mut chain, &mut roots) {
                self.discard(&roots);
                return Err(error);
            }
        }
        match roots.as_slice() {
            [root] => Ok(*root),
            _ => {
                self.discard(&roots);
                Err(StructuralError::TopLevelNodes { count: roots.len() }.into())
            }
        }
    }

    fn discard(&self, nodes: &[NodeId]) {
        for node in nodes {
            if let Err(error) = self.document.remove_node(*node) {
                log::trace!("discarding partial render: {error}");
            }
        }
    }

    /// Appends zero or more rendered copies of `element` to `output`.
    fn render_element(
        &self,
        element: &ElementTemplate,
        chain: &mut ScopeChain,
        output: &mut Vec<NodeId>,
    ) -> Result<(), Error> {
        let directives = &element.directives;
        if let Some(condition) = &directives.condition {
            if !truthy(&condition.eval(chain, self.resolver)?) {
                return Ok(());
            }
        }

        let Some(iteration) = &directives.iteration else {
            output.push(self.render_copy(element, chain)?);
            return Ok(());
        };

        let frames: Vec<Frame> = match iteration.source.eval(chain, self.resolver)? {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| bind(&iteration.item, item, iteration.index.as_deref(), Value::from(index)))
                .collect(),
            Value::Object(entries) => entries
                .into_iter()
                .map(|(key, value)| bind(&iteration.item, value, iteration.index.as_deref(), Value::String(key)))
                .collect(),
            other => {
                return Err(StructuralError::NotIterable {
                    expression: iteration.source.source().trim().to_string(),
                    found: type_name(&other),
                }
                .into());
            }
        };

        for frame in frames {
            chain.push(frame);
            let rendered = self.render_copy(element, chain);
            chain.pop();
            output.push(rendered?);
        }
        Ok(())
    }

    /// One concrete element with bindings, listeners and children applied.
    fn render_copy(&self, element: &ElementTemplate, chain: &mut ScopeChain) -> Result<NodeId, Error> {
        let node = self.document.create_element(&element.tag);
        match self.fill(node, element, chain) {
            Ok(()) => Ok(node),
            Err(error) => {
                self.discard(&[node]);
                Err(error)
            }
        }
    }

    fn fill(&self, node: NodeId, element: &ElementTemplate, chain: &mut ScopeChain) -> Result<(), Error> {
        for (name, value) in &element.attributes {
            self.document.set_attribute(node, name, value)?;
        }

        let directives = &element.directives;
        if let Some(classes) = &directives.classes {
            for (class, value) in self.evaluate_mapping(classes, chain)? {
                if truthy(&value) {
                    self.document.add_class(node, class)?;
                }
            }
        }
        if let Some(styles) = &directives.styles {
            for (property, value) in self.evaluate_mapping(styles, chain)? {
                let value = match value {
                    Value::Null => None,
                    value => Some(display(&value)),
                };
                self.document.set_style(node, property, value.as_deref())?;
            }
        }

        for binding in &directives.events {
            let handler = BoundHandler {
                event: binding.event.clone(),
                actions: self.bind_actions(&binding.actions, chain)?,
            };
            self.document
                .add_event_listener(node, &binding.event, self.sink.listener(handler))?;
        }

        // Children are attached as soon as they exist so that discarding
        // `node` after a failure frees them too.
        for child in &element.children {
            match child {
                TemplateNode::Element(child) => {
                    let mut copies = Vec::new();
                    let rendered = self.render_element(child, chain, &mut copies);
                    for copy in copies {
                        self.document.append_child(node, copy)?;
                    }
                    rendered?;
                }
                TemplateNode::Text(segments) => {
                    let text = self.interpolate(segments, chain)?;
                    self.document.append_child(node, self.document.create_text(&text))?;
                }
            }
        }
        Ok(())
    }

    fn evaluate_mapping<'m>(
        &self,
        mapping: &'m Mapping,
        chain: &ScopeChain,
    ) -> Result<Vec<(&'m str, Value)>, Error> {
        mapping
            .iter()
            .map(|(name, expression)| Ok((name.as_str(), expression.eval(chain, self.resolver)?)))
            .collect()
    }

    fn bind_actions(&self, actions: &[Action], chain: &ScopeChain) -> Result<Vec<BoundAction>, Error> {
        actions
            .iter()
            .map(|action| match action {
                Action::Assign { target, value } => Ok(BoundAction::Assign {
                    target: target.clone(),
                    value: value.clone(),
                }),
                Action::Invoke { method, arguments } => Ok(BoundAction::Invoke {
                    method: method.clone(),
                    arguments: arguments
                        .iter()
                        .map(|argument| match argument {
                            Argument::Event => Ok(BoundArgument::Event),
                            Argument::Value(expression) => {
                                Ok(BoundArgument::Value(expression.eval(chain, self.resolver)?))
                            }
                        })
                        .collect::<Result<_, Error>>()?,
                }),
            })
            .collect()
    }

    fn interpolate(&self, segments: &[TextSegment], chain: &ScopeChain) -> Result<String, Error> {
        let mut text = String::new();
        for segment in segments {
            match segment {
                TextSegment::Literal(literal) => text.push_str(literal),
                TextSegment::Interpolation(expression) => {
                    text.push_str(&display(&expression.eval(chain, self.resolver)?));
                }
            }
        }
        Ok(text)
    }
}

fn bind(item: &str, value: Value, index_name: Option<&str>, index: Value) -> Frame {
    let frame = Frame::new().with(item, value);
    match index_name {
        Some(index_name) => frame.with(index_name, index),
        None => frame,
    }
}
