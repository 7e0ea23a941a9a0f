//! Error taxonomy of the engine.
//!
//! Compile errors are raised while building a component and carry the
//! offending source text; resolution and structural errors come from
//! evaluation and rendering.

use ariadne::{Config, Label, Report, ReportKind, Source};
use puny_scene::{DocumentError, MarkupError, NodeId};
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    EmptyExpression,
    /// A character outside the value, operator, quote and paren classes.
    UnexpectedCharacter(char),
    UnterminatedString,
    /// An operator run outside the supported set, e.g. `*` or `&&!`.
    UnknownOperator(String),
    UnbalancedParenthesis,
    /// A binary operator missing an operand, or a level that does not reduce
    /// to exactly one node.
    IncompleteExpression,
    EmptyPath,
    MalformedMapping(String),
    MalformedIteration(String),
    MalformedAction(String),
    /// `v-bind:<name>` for anything but `class` and `style`.
    UnsupportedDirective(String),
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EmptyExpression => write!(f, "empty expression"),
            Self::UnexpectedCharacter(character) => write!(f, "unexpected character `{character}`"),
            Self::UnterminatedString => write!(f, "unterminated string literal"),
            Self::UnknownOperator(operator) => write!(f, "unimplemented operator `{operator}`"),
            Self::UnbalancedParenthesis => write!(f, "unbalanced parentheses"),
            Self::IncompleteExpression => write!(f, "incomplete expression"),
            Self::EmptyPath => write!(f, "empty variable path"),
            Self::MalformedMapping(reason) => write!(f, "malformed mapping literal: {reason}"),
            Self::MalformedIteration(reason) => write!(f, "malformed v-for: {reason}"),
            Self::MalformedAction(reason) => write!(f, "malformed event action: {reason}"),
            Self::UnsupportedDirective(name) => write!(f, "unsupported directive `{name}`"),
        }
    }
}

/// A malformed expression or directive value, located within its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub source: String,
    pub span: Range<usize>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, source: &str, span: Range<usize>) -> Self {
        Self {
            kind,
            source: source.to_string(),
            span,
        }
    }

    pub fn report(&self, filename: &str) -> String {
        let mut bytes = Vec::new();
        let written = Report::build(ReportKind::Error, (filename, self.span.clone()))
            .with_config(Config::default().with_color(false))
            .with_message(self.kind.to_string())
            .with_label(Label::new((filename, self.span.clone())).with_message(self.kind.to_string()))
            .finish()
            .write((filename, Source::from(self.source.as_str())), &mut bytes);
        match written {
            Ok(()) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => self.to_string(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} in `{}`", self.kind, self.source)
    }
}

impl std::error::Error for CompileError {}

/// What kind of name failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    Variable,
    Field,
    Method,
}

/// A name that is not in scope, not a data field, or not a method.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionError {
    pub kind: ResolutionKind,
    pub name: String,
}

impl ResolutionError {
    pub fn variable(name: &str) -> Self {
        Self {
            kind: ResolutionKind::Variable,
            name: name.to_string(),
        }
    }

    pub fn field(name: &str) -> Self {
        Self {
            kind: ResolutionKind::Field,
            name: name.to_string(),
        }
    }

    pub fn method(name: &str) -> Self {
        Self {
            kind: ResolutionKind::Method,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let what = match self.kind {
            ResolutionKind::Variable => "variable",
            ResolutionKind::Field => "data field",
            ResolutionKind::Method => "method",
        };
        write!(f, "{what} is not defined: {}", self.name)
    }
}

impl std::error::Error for ResolutionError {}

#[derive(Debug, Clone, PartialEq)]
pub enum StructuralError {
    /// A render produced zero or several top-level nodes.
    TopLevelNodes { count: usize },
    /// A `v-for` source evaluated to something other than a sequence or mapping.
    NotIterable { expression: String, found: &'static str },
    /// Component data was not a JSON object.
    DataNotMapping { found: &'static str },
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::TopLevelNodes { count } => {
                write!(f, "template must render exactly one top-level node, got {count}")
            }
            Self::NotIterable { expression, found } => {
                write!(f, "v-for source `{expression}` is {found}, not a sequence or mapping")
            }
            Self::DataNotMapping { found } => write!(f, "component data must be a mapping, got {found}"),
        }
    }
}

impl std::error::Error for StructuralError {}

#[derive(Debug, Clone, PartialEq)]
pub enum MountError {
    /// No node matches the selector.
    Unresolved(String),
    /// The node was freed or belongs to an earlier render.
    Stale(NodeId),
    /// The node is the body or is not attached under it.
    Unparented(NodeId),
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unresolved(selector) => write!(f, "node mounting is invalid: {selector}"),
            Self::Stale(node) => write!(f, "mount node {node} is not part of the document"),
            Self::Unparented(node) => write!(f, "mount node {node} has no parent in the document to render into"),
        }
    }
}

impl std::error::Error for MountError {}

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Compile(CompileError),
    Resolution(ResolutionError),
    Structural(StructuralError),
    Mount(MountError),
    Markup(MarkupError),
    Document(DocumentError),
}

impl Error {
    /// Human-readable diagnostic; source-annotated for compile and markup errors.
    pub fn report(&self, filename: &str) -> String {
        match self {
            Self::Compile(error) => error.report(filename),
            Self::Markup(error) => error.report(filename),
            other => format!("{filename}: {other}\n"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Compile(error) => write!(f, "[puny] {error}"),
            Self::Resolution(error) => write!(f, "[puny] {error}"),
            Self::Structural(error) => write!(f, "[puny] {error}"),
            Self::Mount(error) => write!(f, "[puny] {error}"),
            Self::Markup(error) => write!(f, "[puny] {error}"),
            Self::Document(error) => write!(f, "[puny] {error}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Compile(error) => Some(error),
            Self::Resolution(error) => Some(error),
            Self::Structural(error) => Some(error),
            Self::Mount(error) => Some(error),
            Self::Markup(error) => Some(error),
            Self::Document(error) => Some(error),
        }
    }
}

impl From<CompileError> for Error {
    fn from(error: CompileError) -> Self {
        Self::Compile(error)
    }
}

impl From<ResolutionError> for Error {
    fn from(error: ResolutionError) -> Self {
        Self::Resolution(error)
    }
}

impl From<StructuralError> for Error {
    fn from(error: StructuralError) -> Self {
        Self::Structural(error)
    }
}

impl From<MountError> for Error {
    fn from(error: MountError) -> Self {
        Self::Mount(error)
    }
}

impl From<MarkupError> for Error {
    fn from(error: MarkupError) -> Self {
        Self::Markup(error)
    }
}

impl From<DocumentError> for Error {
    fn from(error: DocumentError) -> Self {
        Self::Document(error)
    }
}
