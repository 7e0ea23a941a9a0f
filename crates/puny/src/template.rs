//! Template compilation.
//!
//! Markup is turned into a tree of [`TemplateNode`]s once, when a component is
//! built. Every directive value is compiled at that point, so a malformed
//! template fails before anything renders.

use crate::directive::{self, ActionSyntax, ArgumentSyntax, Spanned};
use crate::error::{CompileError, CompileErrorKind, Error};
use crate::expression::{self, CompiledExpression};
use puny_scene::{Markup, MarkupElement, parse_markup};
use std::collections::HashMap;
use std::ops::Range;
use std::rc::Rc;

pub const CONDITION: &str = "v-if";
pub const ITERATION: &str = "v-for";
pub const BIND_PREFIX: &str = "v-bind:";
pub const EVENT_PREFIX: &str = "@";

/// Ordered `(name, expression)` pairs of a mapping literal.
pub type Mapping = Vec<(String, Rc<CompiledExpression>)>;

/// Compiled forms keyed by their source text, shared by every element and
/// render pass of one component.
#[derive(Debug, Default)]
pub struct CompileCache {
    expressions: HashMap<String, Rc<CompiledExpression>>,
    mappings: HashMap<String, Rc<Mapping>>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expression(&mut self, source: &str) -> Result<Rc<CompiledExpression>, CompileError> {
        if let Some(compiled) = self.expressions.get(source) {
            return Ok(compiled.clone());
        }
        let compiled = Rc::new(expression::compile(source)?);
        self.expressions.insert(source.to_string(), compiled.clone());
        Ok(compiled)
    }

    pub fn mapping(&mut self, source: &str) -> Result<Rc<Mapping>, CompileError> {
        if let Some(mapping) = self.mappings.get(source) {
            return Ok(mapping.clone());
        }
        let mut mapping = Mapping::new();
        for entry in directive::parse_mapping(source)? {
            let value = self.fragment(source, &entry.value)?;
            mapping.push((entry.key, value));
        }
        let mapping = Rc::new(mapping);
        self.mappings.insert(source.to_string(), mapping.clone());
        Ok(mapping)
    }

    /// Compiles an expression embedded in a larger directive value; errors
    /// point into the whole value.
    fn fragment(&mut self, whole: &str, fragment: &Spanned<String>) -> Result<Rc<CompiledExpression>, CompileError> {
        self.expression(&fragment.node).map_err(|error| {
            let offset = fragment.span.start;
            CompileError::new(error.kind, whole, error.span.start + offset..error.span.end + offset)
        })
    }

    pub fn expression_count(&self) -> usize {
        self.expressions.len()
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }
}

#[derive(Debug, Clone)]
pub struct Template {
    /// Top-level elements; top-level text is not part of a component.
    pub roots: Vec<ElementTemplate>,
}

#[derive(Debug, Clone)]
pub enum TemplateNode {
    Element(ElementTemplate),
    Text(Vec<TextSegment>),
}

#[derive(Debug, Clone)]
pub enum TextSegment {
    Literal(String),
    Interpolation(Rc<CompiledExpression>),
}

#[derive(Debug, Clone)]
pub struct ElementTemplate {
    pub tag: String,
    /// Attributes copied verbatim to every rendered copy.
    pub attributes: Vec<(String, String)>,
    pub directives: Directives,
    pub children: Vec<TemplateNode>,
}

#[derive(Debug, Clone, Default)]
pub struct Directives {
    pub condition: Option<Rc<CompiledExpression>>,
    pub iteration: Option<Iteration>,
    pub classes: Option<Rc<Mapping>>,
    pub styles: Option<Rc<Mapping>>,
    pub events: Vec<EventBinding>,
}

#[derive(Debug, Clone)]
pub struct Iteration {
    pub item: String,
    pub index: Option<String>,
    pub source: Rc<CompiledExpression>,
}

#[derive(Debug, Clone)]
pub struct EventBinding {
    pub event: String,
    pub actions: Rc<[Action]>,
}

#[derive(Debug, Clone)]
pub enum Action {
    Assign {
        target: String,
        value: Rc<CompiledExpression>,
    },
    Invoke {
        method: String,
        arguments: Vec<Argument>,
    },
}

#[derive(Debug, Clone)]
pub enum Argument {
    /// The event being dispatched.
    Event,
    /// Evaluated when the listener is attached.
    Value(Rc<CompiledExpression>),
}

impl Template {
    pub fn compile(source: &str, cache: &mut CompileCache) -> Result<Self, Error> {
        let nodes = parse_markup(source)?;
        Self::from_markup(&nodes, cache)
    }

    pub fn from_markup(nodes: &[Markup], cache: &mut CompileCache) -> Result<Self, Error> {
        let roots = nodes
            .iter()
            .filter_map(|node| match node {
                Markup::Element(element) => Some(compile_element(element, cache)),
                Markup::Text(_) => None,
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { roots })
    }

    /// Every event action in the template, in document order.
    pub fn actions(&self) -> Vec<&Action> {
        fn collect<'a>(element: &'a ElementTemplate, actions: &mut Vec<&'a Action>) {
            for binding in &element.directives.events {
                actions.extend(binding.actions.iter());
            }
            for child in &element.children {
                if let TemplateNode::Element(child) = child {
                    collect(child, actions);
                }
            }
        }

        let mut actions = Vec::new();
        for root in &self.roots {
            collect(root, &mut actions);
        }
        actions
    }
}

fn compile_element(element: &MarkupElement, cache: &mut CompileCache) -> Result<ElementTemplate, Error> {
    let mut attributes = Vec::new();
    let mut directives = Directives::default();

    for (name, value) in &element.attributes {
        match name.as_str() {
            CONDITION => directives.condition = Some(cache.expression(value)?),
            ITERATION => directives.iteration = Some(compile_iteration(value, cache)?),
            "v-bind:class" => directives.classes = Some(cache.mapping(value)?),
            "v-bind:style" => directives.styles = Some(cache.mapping(value)?),
            name if name.starts_with(BIND_PREFIX) => {
                return Err(CompileError::new(
                    CompileErrorKind::UnsupportedDirective(name.to_string()),
                    name,
                    0..name.len(),
                )
                .into());
            }
            name if name.starts_with(EVENT_PREFIX) && name.len() > EVENT_PREFIX.len() => {
                directives.events.push(EventBinding {
                    event: name[EVENT_PREFIX.len()..].to_string(),
                    actions: compile_actions(value, cache)?.into(),
                });
            }
            _ => attributes.push((name.clone(), value.clone())),
        }
    }

    let children = element
        .children
        .iter()
        .map(|child| match child {
            Markup::Element(child) => compile_element(child, cache).map(TemplateNode::Element),
            Markup::Text(text) => compile_text(text, cache).map(TemplateNode::Text).map_err(Error::from),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ElementTemplate {
        tag: element.tag.clone(),
        attributes,
        directives,
        children,
    })
}

fn compile_iteration(source: &str, cache: &mut CompileCache) -> Result<Iteration, CompileError> {
    let header = directive::parse_iteration(source)?;
    Ok(Iteration {
        source: cache.fragment(source, &header.source)?,
        item: header.item,
        index: header.index,
    })
}

fn compile_actions(source: &str, cache: &mut CompileCache) -> Result<Vec<Action>, CompileError> {
    directive::parse_actions(source)?
        .into_iter()
        .map(|action| match action {
            ActionSyntax::Assign { target, value } => Ok(Action::Assign {
                target,
                value: cache.fragment(source, &value)?,
            }),
            ActionSyntax::Invoke { method, arguments } => Ok(Action::Invoke {
                method,
                arguments: arguments
                    .iter()
                    .map(|argument| match argument {
                        ArgumentSyntax::Event => Ok(Argument::Event),
                        ArgumentSyntax::Expression(text) => cache.fragment(source, text).map(Argument::Value),
                    })
                    .collect::<Result<_, _>>()?,
            }),
        })
        .collect()
}

/// Splits text on `{{ expression }}` spans. An opening brace pair without a
/// closing one is literal text.
fn compile_text(text: &str, cache: &mut CompileCache) -> Result<Vec<TextSegment>, CompileError> {
    let mut segments = Vec::new();
    for piece in split_interpolations(text) {
        match piece {
            Piece::Literal(literal) => segments.push(TextSegment::Literal(literal.to_string())),
            Piece::Expression(range) => {
                let fragment = Spanned {
                    span: range.clone(),
                    node: text[range].to_string(),
                };
                segments.push(TextSegment::Interpolation(cache.fragment(text, &fragment)?));
            }
        }
    }
    Ok(segments)
}

enum Piece<'a> {
    Literal(&'a str),
    Expression(Range<usize>),
}

fn split_interpolations(text: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = 0;
    while let Some(open) = text[rest..].find("{{").map(|offset| rest + offset) {
        let Some(close) = text[open + 2..].find("}}").map(|offset| open + 2 + offset) else {
            break;
        };
        if open > rest {
            pieces.push(Piece::Literal(&text[rest..open]));
        }
        pieces.push(Piece::Expression(open + 2..close));
        rest = close + 2;
    }
    if rest < text.len() {
        pieces.push(Piece::Literal(&text[rest..]));
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> (Template, CompileCache) {
        let mut cache = CompileCache::new();
        let template = Template::compile(source, &mut cache).unwrap();
        (template, cache)
    }

    #[test]
    fn directives_are_split_from_plain_attributes() {
        let (template, _) = compile(
            r#"<div id="popup" v-if="show" v-bind:class="{open: show}" v-bind:style="{left: x + 'px'}" @click="show = false" title="t"></div>"#,
        );
        let root = &template.roots[0];
        assert_eq!(
            root.attributes,
            vec![
                ("id".to_string(), "popup".to_string()),
                ("title".to_string(), "t".to_string()),
            ]
        );
        assert!(root.directives.condition.is_some());
        assert_eq!(root.directives.classes.as_ref().map(|mapping| mapping.len()), Some(1));
        assert_eq!(root.directives.styles.as_ref().map(|mapping| mapping[0].0.clone()), Some("left".to_string()));
        assert_eq!(root.directives.events[0].event, "click");
    }

    #[test]
    fn top_level_text_is_ignored() {
        let (template, _) = compile("\n  <p>a</p>\n  ");
        assert_eq!(template.roots.len(), 1);
    }

    #[test]
    fn identical_sources_share_one_compiled_form() {
        let (template, cache) = compile(
            r#"<ul><li v-for="item in items" v-bind:class="{on: item.on}">{{ item.name }}</li><li v-if="items.length" v-bind:class="{on: item.on}">{{ item.name }}</li></ul>"#,
        );
        assert_eq!(cache.mapping_count(), 1);
        // items, item.on, " item.name ", items.length
        assert_eq!(cache.expression_count(), 4);

        let TemplateNode::Element(first) = &template.roots[0].children[0] else {
            panic!("expected element");
        };
        let TemplateNode::Element(second) = &template.roots[0].children[1] else {
            panic!("expected element");
        };
        let first = first.directives.classes.as_ref().unwrap();
        let second = second.directives.classes.as_ref().unwrap();
        assert!(Rc::ptr_eq(first, second));
    }

    #[test]
    fn interpolation_splits_text() {
        let (template, _) = compile("<p>Hello {{ name }}, {{count}} new {{ unclosed</p>");
        let TemplateNode::Text(segments) = &template.roots[0].children[0] else {
            panic!("expected text");
        };
        let shapes: Vec<_> = segments
            .iter()
            .map(|segment| match segment {
                TextSegment::Literal(text) => format!("literal:{text}"),
                TextSegment::Interpolation(expression) => format!("expr:{}", expression.source().trim()),
            })
            .collect();
        assert_eq!(
            shapes,
            vec!["literal:Hello ", "expr:name", "literal:, ", "expr:count", "literal: new {{ unclosed"]
        );
    }

    #[test]
    fn event_actions_keep_argument_kinds() {
        let (template, _) = compile(r#"<b @mouseup="pick(word, $event); open = !open"></b>"#);
        let actions = template.actions();
        assert_eq!(actions.len(), 2);
        let Action::Invoke { method, arguments } = actions[0] else {
            panic!("expected invocation");
        };
        assert_eq!(method, "pick");
        assert!(matches!(arguments.as_slice(), [Argument::Value(_), Argument::Event]));
        assert!(matches!(actions[1], Action::Assign { target, .. } if target == "open"));
    }

    #[test]
    fn compile_errors_point_into_the_directive_value() {
        let mut cache = CompileCache::new();
        let error = Template::compile(r#"<p v-bind:style="{left: (x + 1}"></p>"#, &mut cache).unwrap_err();
        let Error::Compile(error) = error else {
            panic!("expected compile error, got {error:?}");
        };
        assert_eq!(error.source, "{left: (x + 1}");

        let error = Template::compile(r#"<p>{{ a ++ b }}</p>"#, &mut cache).unwrap_err();
        let Error::Compile(error) = error else {
            panic!("expected compile error, got {error:?}");
        };
        assert_eq!(error.kind, CompileErrorKind::UnknownOperator("++".to_string()));
        assert_eq!(error.source, "{{ a ++ b }}");
        assert_eq!(error.span, 5..7);
    }

    #[test]
    fn unknown_bindings_are_rejected() {
        let mut cache = CompileCache::new();
        let error = Template::compile(r#"<a v-bind:href="url"></a>"#, &mut cache).unwrap_err();
        assert!(matches!(
            error,
            Error::Compile(CompileError { kind: CompileErrorKind::UnsupportedDirective(ref name), .. }) if name == "v-bind:href"
        ));
    }

    #[test]
    fn malformed_markup_is_reported() {
        let mut cache = CompileCache::new();
        let error = Template::compile("<div><span></div>", &mut cache).unwrap_err();
        assert!(matches!(error, Error::Markup(_)));
    }
}
