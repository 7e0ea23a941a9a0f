//! Template expression language.
//!
//! Expressions are compiled once into a [`CompiledExpression`] tree and then
//! evaluated any number of times against different scope chains. Binary
//! operators have no precedence: a binary node is reduced as soon as its right
//! operand is known, so `a && b || c` is `(a && b) || c`. Parentheses are the
//! only grouping tool.

mod operators;
mod tokenizer;

pub use operators::{BinaryOperator, display, number_value, strict_equal, to_number, truthy, type_name};
pub use tokenizer::{Token, TokenKind, tokenize};

use crate::error::{CompileError, CompileErrorKind, ResolutionError};
use crate::scope::{Resolver, ScopeChain};
use serde_json::Value;
use smallvec::SmallVec;
use std::fmt;
use std::ops::Range;

/// One step after the root of a variable path.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// `.name`, also used for `length`.
    Key(String),
    /// `[n]` or a purely numeric `.n`.
    Index(usize),
}

/// `item.x[1].name` as a root name plus property/index steps.
#[derive(Debug, Clone, PartialEq)]
pub struct VariablePath {
    pub root: String,
    pub segments: SmallVec<[Segment; 4]>,
}

impl VariablePath {
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text
            .split(['.', '[', ']'])
            .map(str::trim)
            .filter(|part| !part.is_empty());
        let root = parts.next()?.to_string();
        let segments = parts
            .map(|part| match part.parse::<usize>() {
                Ok(index) => Segment::Index(index),
                Err(_) => Segment::Key(part.to_string()),
            })
            .collect();
        Some(Self { root, segments })
    }

    pub fn eval(&self, chain: &ScopeChain, resolver: &dyn Resolver) -> Result<Value, ResolutionError> {
        let root = match chain.lookup(&self.root) {
            Some(value) => value.clone(),
            None => resolver
                .resolve(&self.root)
                .ok_or_else(|| ResolutionError::variable(&self.root))?,
        };
        Ok(self.segments.iter().fold(root, step))
    }
}

// Missing properties and nullish intermediates both read as null.
fn step(value: Value, segment: &Segment) -> Value {
    match (value, segment) {
        (Value::Array(items), Segment::Index(index)) => items.into_iter().nth(*index).unwrap_or(Value::Null),
        (Value::Array(items), Segment::Key(key)) if key == "length" => Value::from(items.len()),
        (Value::String(text), Segment::Key(key)) if key == "length" => Value::from(text.chars().count()),
        (Value::String(text), Segment::Index(index)) => text
            .chars()
            .nth(*index)
            .map_or(Value::Null, |character| Value::String(character.to_string())),
        (Value::Object(mut map), Segment::Key(key)) => map.remove(key).unwrap_or(Value::Null),
        (Value::Object(mut map), Segment::Index(index)) => map.remove(&index.to_string()).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

impl fmt::Display for VariablePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Constant(Value),
    Path(VariablePath),
    Not(Box<Node>),
    Binary {
        operator: BinaryOperator,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    pub fn eval(&self, chain: &ScopeChain, resolver: &dyn Resolver) -> Result<Value, ResolutionError> {
        match self {
            Self::Constant(value) => Ok(value.clone()),
            Self::Path(path) => path.eval(chain, resolver),
            Self::Not(operand) => Ok(Value::Bool(!truthy(&operand.eval(chain, resolver)?))),
            Self::Binary { operator, left, right } => {
                let left = left.eval(chain, resolver)?;
                match operator {
                    BinaryOperator::And if !truthy(&left) => Ok(left),
                    BinaryOperator::Or if truthy(&left) => Ok(left),
                    operator => Ok(operator.apply(left, right.eval(chain, resolver)?)),
                }
            }
        }
    }

    /// Root names of every variable path, in source order.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Constant(_) => {}
            Self::Path(path) => {
                if !names.contains(&path.root.as_str()) {
                    names.push(&path.root);
                }
            }
            Self::Not(operand) => operand.collect_variables(names),
            Self::Binary { left, right, .. } => {
                left.collect_variables(names);
                right.collect_variables(names);
            }
        }
    }
}

/// Fully parenthesized form, showing how the expression was grouped.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Constant(Value::String(text)) => write!(f, "'{text}'"),
            Self::Constant(value) => write!(f, "{value}"),
            Self::Path(path) => write!(f, "{path}"),
            Self::Not(operand) => write!(f, "!{operand}"),
            Self::Binary { operator, left, right } => write!(f, "({left} {} {right})", operator.symbol()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    source: String,
    root: Node,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn eval(&self, chain: &ScopeChain, resolver: &dyn Resolver) -> Result<Value, ResolutionError> {
        self.root.eval(chain, resolver)
    }
}

impl fmt::Display for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

/// Compiles `source` into an evaluable tree. Every structural problem is
/// reported here; evaluation can only fail on names that do not resolve.
pub fn compile(source: &str) -> Result<CompiledExpression, CompileError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(CompileError::new(CompileErrorKind::EmptyExpression, source, 0..source.len()));
    }

    let mut parser = Parser {
        source,
        levels: vec![Level::new(LevelKind::Root, 0)],
    };
    for token in tokens {
        parser.feed(token)?;
    }
    let root = parser.finish()?;
    Ok(CompiledExpression {
        source: source.to_string(),
        root,
    })
}

enum Item {
    Node(Node, Range<usize>),
    Operator(BinaryOperator, Range<usize>),
}

impl Item {
    fn span(&self) -> Range<usize> {
        match self {
            Self::Node(_, span) | Self::Operator(_, span) => span.clone(),
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum LevelKind {
    Root,
    Group,
    Negation,
}

/// One open parenthesis or `!`, plus the root.
struct Level {
    kind: LevelKind,
    opened_at: usize,
    items: SmallVec<[Item; 3]>,
}

impl Level {
    fn new(kind: LevelKind, opened_at: usize) -> Self {
        Self {
            kind,
            opened_at,
            items: SmallVec::new(),
        }
    }
}

struct Parser<'src> {
    source: &'src str,
    levels: Vec<Level>,
}

impl<'src> Parser<'src> {
    fn error(&self, kind: CompileErrorKind, span: Range<usize>) -> CompileError {
        CompileError::new(kind, self.source, span)
    }

    fn feed(&mut self, token: Token<'src>) -> Result<(), CompileError> {
        match (token.kind, token.text) {
            (TokenKind::Mark, "(") => {
                self.levels.push(Level::new(LevelKind::Group, token.span.start));
                Ok(())
            }
            (TokenKind::Mark, _) => {
                if self.levels.len() == 1 {
                    return Err(self.error(CompileErrorKind::UnbalancedParenthesis, token.span));
                }
                let (node, span) = self.pop_level(token.span.end)?;
                self.forward(Item::Node(node, span))
            }
            (TokenKind::Operator, "!") => {
                self.levels.push(Level::new(LevelKind::Negation, token.span.start));
                Ok(())
            }
            (TokenKind::Operator, symbol) => match BinaryOperator::from_symbol(symbol) {
                Some(operator) => self.forward(Item::Operator(operator, token.span)),
                None => Err(self.error(CompileErrorKind::UnknownOperator(symbol.to_string()), token.span)),
            },
            (TokenKind::StringLiteral, text) => {
                let inner = &text[1..text.len() - 1];
                self.forward(Item::Node(Node::Constant(Value::String(inner.to_string())), token.span))
            }
            (TokenKind::Value, text) => {
                let node = match serde_json::from_str::<Value>(text) {
                    Ok(value) => Node::Constant(value),
                    Err(_) => match VariablePath::parse(text) {
                        Some(path) => Node::Path(path),
                        None => return Err(self.error(CompileErrorKind::EmptyPath, token.span)),
                    },
                };
                self.forward(Item::Node(node, token.span))
            }
        }
    }

    /// Places an item on the innermost level, reducing a pending binary form
    /// as soon as its right operand arrives and closing a negation as soon as
    /// its operand does.
    fn forward(&mut self, item: Item) -> Result<(), CompileError> {
        let source = self.source;
        let Some(level) = self.levels.last_mut() else {
            return Err(CompileError::new(CompileErrorKind::IncompleteExpression, source, item.span()));
        };
        let follows_operator = matches!(level.items.last(), Some(Item::Operator(..)));
        let negation = level.kind == LevelKind::Negation;

        if matches!(item, Item::Operator(..)) && (follows_operator || negation) {
            return Err(CompileError::new(CompileErrorKind::IncompleteExpression, source, item.span()));
        }
        level.items.push(item);
        if follows_operator {
            reduce_binary(level, source)?;
        }

        if negation {
            let end = level.items.last().map_or(level.opened_at, |item| item.span().end);
            let (operand, span) = self.pop_level(end)?;
            return self.forward(Item::Node(Node::Not(Box::new(operand)), span));
        }
        Ok(())
    }

    fn pop_level(&mut self, end: usize) -> Result<(Node, Range<usize>), CompileError> {
        let Some(level) = self.levels.pop() else {
            return Err(self.error(CompileErrorKind::UnbalancedParenthesis, end..end));
        };
        let span = level.opened_at..end;
        let mut items = level.items.into_iter();
        match (items.next(), items.next()) {
            (Some(Item::Node(node, _)), None) => Ok((node, span)),
            _ => Err(self.error(CompileErrorKind::IncompleteExpression, span)),
        }
    }

    fn finish(mut self) -> Result<Node, CompileError> {
        let end = self.source.len();
        let unclosed = self
            .levels
            .last()
            .filter(|level| level.kind != LevelKind::Root)
            .map(|level| (level.kind, level.opened_at));
        if let Some((kind, opened_at)) = unclosed {
            let kind = match kind {
                LevelKind::Group => CompileErrorKind::UnbalancedParenthesis,
                _ => CompileErrorKind::IncompleteExpression,
            };
            return Err(self.error(kind, opened_at..end));
        }
        self.pop_level(end).map(|(node, _)| node)
    }
}

/// `[left, operator, right]` becomes one binary node; anything else means an
/// operator had no left operand.
fn reduce_binary(level: &mut Level, source: &str) -> Result<(), CompileError> {
    let start = level.items.first().map_or(level.opened_at, |item| item.span().start);
    let end = level.items.last().map_or(source.len(), |item| item.span().end);
    let mut items = std::mem::take(&mut level.items).into_iter();
    match (items.next(), items.next(), items.next(), items.next()) {
        (
            Some(Item::Node(left, left_span)),
            Some(Item::Operator(operator, _)),
            Some(Item::Node(right, right_span)),
            None,
        ) => {
            let node = Node::Binary {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
            level.items.push(Item::Node(node, left_span.start..right_span.end));
            Ok(())
        }
        _ => Err(CompileError::new(CompileErrorKind::IncompleteExpression, source, start..end)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Frame;
    use serde_json::json;

    fn eval(source: &str) -> Value {
        compile(source).unwrap().eval(&ScopeChain::new(), &()).unwrap()
    }

    fn eval_with(source: &str, frame: Frame) -> Value {
        compile(source).unwrap().eval(&ScopeChain::from(vec![frame]), &()).unwrap()
    }

    fn compile_error(source: &str) -> CompileErrorKind {
        compile(source).unwrap_err().kind
    }

    #[test]
    fn literals_evaluate_to_themselves() {
        assert_eq!(eval("1"), json!(1));
        assert_eq!(eval("2.5"), json!(2.5));
        assert_eq!(eval("'x'"), json!("x"));
        assert_eq!(eval("\"x y\""), json!("x y"));
        assert_eq!(eval("true"), json!(true));
        assert_eq!(eval("null"), Value::Null);
    }

    #[test]
    fn binary_operators_reduce_left_to_right() {
        assert_eq!(eval("1 + 2 - 3"), json!(0));
        assert_eq!(eval("10 - 2 - 3"), json!(5));
        assert_eq!(eval("1 - (2 - 3)"), json!(2));
        assert_eq!(compile("1 + 2 - 3").unwrap().to_string(), "((1 + 2) - 3)");

        let frame = Frame::new()
            .with("a", json!(true))
            .with("b", json!(false))
            .with("c", json!(true));
        assert_eq!(eval_with("a && b || c", frame.clone()), json!(true));
        assert_eq!(eval_with("c || a && b", frame), json!(false));
    }

    #[test]
    fn negation_binds_to_the_next_operand_only() {
        let frame = Frame::new().with("open", json!(false)).with("count", json!(0));
        assert_eq!(eval_with("!open", frame.clone()), json!(true));
        assert_eq!(eval_with("! open && count", frame.clone()), json!(0));
        assert_eq!(eval_with("!(open || count)", frame.clone()), json!(true));
        assert_eq!(eval_with("count || ! open", frame), json!(true));
        assert_eq!(compile("!!a").unwrap_err().kind, CompileErrorKind::UnknownOperator("!!".into()));
        assert_eq!(compile("! ! a").unwrap().to_string(), "!!a");
    }

    #[test]
    fn variable_paths_walk_properties_and_indexes() {
        let frame = Frame::new().with("item", json!({"x": [10, 20], "name": "pen"}));
        assert_eq!(eval_with("item.x[1]", frame.clone()), json!(20));
        assert_eq!(eval_with("item.x.length", frame.clone()), json!(2));
        assert_eq!(eval_with("item.name.length", frame.clone()), json!(3));
        assert_eq!(eval_with("item.missing.deeper", frame.clone()), Value::Null);
        assert_eq!(eval_with("item.x[5]", frame), Value::Null);
    }

    #[test]
    fn string_concatenation_and_comparison() {
        let frame = Frame::new().with("left", json!(12));
        assert_eq!(eval_with("left + 'px'", frame.clone()), json!("12px"));
        assert_eq!(eval_with("left > 10 && left < 20", frame.clone()), json!(true));
        assert_eq!(eval_with("left === 12", frame.clone()), json!(true));
        assert_eq!(eval_with("left == '12'", frame.clone()), json!(true));
        assert_eq!(eval_with("left !== '12'", frame), json!(true));
    }

    #[test]
    fn short_circuit_skips_unresolvable_right_operands() {
        assert_eq!(eval("false && missing"), json!(false));
        assert_eq!(eval("'set' || missing"), json!("set"));
    }

    #[test]
    fn unknown_names_fail_at_evaluation() {
        let compiled = compile("known + unknown").unwrap();
        let frame = Frame::new().with("known", json!(1));
        let error = compiled.eval(&ScopeChain::from(vec![frame]), &()).unwrap_err();
        assert_eq!(error, ResolutionError::variable("unknown"));
    }

    #[test]
    fn resolver_is_consulted_after_frames() {
        let data = json!({"title": "data", "shared": "data"});
        let data = data.as_object().unwrap();
        let compiled = compile("shared + ':' + title").unwrap();
        let chain = ScopeChain::from(vec![Frame::new().with("shared", json!("frame"))]);
        assert_eq!(compiled.eval(&chain, data).unwrap(), json!("frame:data"));
    }

    #[test]
    fn malformed_expressions_fail_to_compile() {
        assert_eq!(compile_error(""), CompileErrorKind::EmptyExpression);
        assert_eq!(compile_error("   "), CompileErrorKind::EmptyExpression);
        assert_eq!(compile_error("(a"), CompileErrorKind::UnbalancedParenthesis);
        assert_eq!(compile_error("a)"), CompileErrorKind::UnbalancedParenthesis);
        assert_eq!(compile_error("()"), CompileErrorKind::IncompleteExpression);
        assert_eq!(compile_error("a +"), CompileErrorKind::IncompleteExpression);
        assert_eq!(compile_error("+ a"), CompileErrorKind::IncompleteExpression);
        assert_eq!(compile_error("a + + b"), CompileErrorKind::IncompleteExpression);
        assert_eq!(compile_error("(a b)"), CompileErrorKind::IncompleteExpression);
        assert_eq!(compile_error("a b"), CompileErrorKind::IncompleteExpression);
        assert_eq!(compile_error("!"), CompileErrorKind::IncompleteExpression);
        assert_eq!(compile_error("a => b"), CompileErrorKind::UnknownOperator("=>".into()));
        assert_eq!(compile_error("."), CompileErrorKind::EmptyPath);
        assert_eq!(eval("[]"), json!([]));
    }

    #[test]
    fn compile_errors_carry_spans() {
        let error = compile("a + (b - c").unwrap_err();
        assert_eq!(error.kind, CompileErrorKind::UnbalancedParenthesis);
        assert_eq!(error.span, 4..10);

        let error = compile("a >= b").unwrap_err();
        assert_eq!(error.span, 2..4);
        assert!(error.report("expr").contains("unimplemented operator `>=`"));
    }

    #[test]
    fn variables_lists_root_names_once() {
        let compiled = compile("a.b + c[0] + a").unwrap();
        assert_eq!(compiled.root().variables(), vec!["a", "c"]);
    }
}
