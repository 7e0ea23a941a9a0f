//! Grammars for directive attribute values.
//!
//! These only split a directive into its pieces; the expression parts are kept
//! as source text with their byte span inside the attribute value so compile
//! errors can point back into it.

use crate::error::{CompileError, CompileErrorKind};
use chumsky::prelude::*;
use std::ops::Range;

pub type Span = SimpleSpan;
pub type ParseError<'src> = Rich<'src, char, Span>;

pub const EVENT_ARGUMENT: &str = "$event";

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub span: Range<usize>,
    pub node: T,
}

impl Spanned<String> {
    fn trimmed(text: &str, span: Span) -> Self {
        let leading = text.len() - text.trim_start().len();
        let trimmed = text.trim();
        let start = span.start + leading;
        Self {
            span: start..start + trimmed.len(),
            node: trimmed.to_string(),
        }
    }
}

/// One `name: expression` pair of a `{...}` mapping literal.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingEntry {
    pub key: String,
    pub value: Spanned<String>,
}

/// `(item, index) in source`
#[derive(Debug, Clone, PartialEq)]
pub struct IterationHeader {
    pub item: String,
    pub index: Option<String>,
    pub source: Spanned<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionSyntax {
    Assign {
        target: String,
        value: Spanned<String>,
    },
    Invoke {
        method: String,
        arguments: Vec<ArgumentSyntax>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentSyntax {
    Event,
    Expression(Spanned<String>),
}

pub fn parse_mapping(source: &str) -> Result<Vec<MappingEntry>, CompileError> {
    mapping()
        .parse(source)
        .into_result()
        .map_err(|errors| to_compile_error(source, errors, CompileErrorKind::MalformedMapping))
}

pub fn parse_iteration(source: &str) -> Result<IterationHeader, CompileError> {
    iteration()
        .parse(source)
        .into_result()
        .map_err(|errors| to_compile_error(source, errors, CompileErrorKind::MalformedIteration))
}

pub fn parse_actions(source: &str) -> Result<Vec<ActionSyntax>, CompileError> {
    actions()
        .parse(source)
        .into_result()
        .map_err(|errors| to_compile_error(source, errors, CompileErrorKind::MalformedAction))
}

fn to_compile_error(
    source: &str,
    errors: Vec<ParseError<'_>>,
    kind: fn(String) -> CompileErrorKind,
) -> CompileError {
    match errors.into_iter().next() {
        Some(error) => CompileError::new(kind(error.to_string()), source, error.span().into_range()),
        None => CompileError::new(kind("no input".to_string()), source, 0..source.len()),
    }
}

fn quoted<'src>() -> impl Parser<'src, &'src str, &'src str, extra::Err<ParseError<'src>>> + Clone {
    choice((
        just('\'')
            .ignore_then(none_of('\'').repeated().to_slice())
            .then_ignore(just('\'')),
        just('"')
            .ignore_then(none_of('"').repeated().to_slice())
            .then_ignore(just('"')),
    ))
}

fn name<'src>() -> impl Parser<'src, &'src str, String, extra::Err<ParseError<'src>>> + Clone {
    any()
        .filter(|character: &char| character.is_ascii_alphanumeric() || matches!(character, '_' | '$'))
        .repeated()
        .at_least(1)
        .to_slice()
        .map(ToString::to_string)
}

/// Expression text up to the first unquoted, unnested character of `stop`.
fn expression_text<'src>(
    stop: &'static str,
) -> impl Parser<'src, &'src str, Spanned<String>, extra::Err<ParseError<'src>>> + Clone {
    let group = recursive(|group| {
        just('(')
            .then(
                choice((quoted().ignored(), group, none_of("()'\"").ignored()))
                    .repeated(),
            )
            .then(just(')'))
            .ignored()
    });

    choice((
        quoted().ignored(),
        group,
        none_of("()'\"").and_is(one_of(stop).not()).ignored(),
    ))
    .repeated()
    .at_least(1)
    .to_slice()
    .try_map(|text: &str, span: Span| {
        if text.trim().is_empty() {
            Err(ParseError::custom(span, "expected an expression"))
        } else {
            Ok(Spanned::trimmed(text, span))
        }
    })
}

fn mapping<'src>() -> impl Parser<'src, &'src str, Vec<MappingEntry>, extra::Err<ParseError<'src>>> {
    let bare_key = none_of(" \t\r\n:,'\"{}")
        .repeated()
        .at_least(1)
        .to_slice();
    let key = choice((quoted(), bare_key)).padded();

    let entry = key
        .then_ignore(just(':'))
        .then(expression_text(",}"))
        .map(|(key, value): (&str, Spanned<String>)| MappingEntry {
            key: key.to_string(),
            value,
        });

    entry
        .separated_by(just(','))
        .allow_trailing()
        .collect::<Vec<_>>()
        .then_ignore(text::whitespace())
        .delimited_by(just('{'), just('}'))
        .padded()
        .then_ignore(end())
}

fn iteration<'src>() -> impl Parser<'src, &'src str, IterationHeader, extra::Err<ParseError<'src>>> {
    let names = name().then(just(',').padded().ignore_then(name()).or_not());
    let header = choice((
        names.clone().padded().delimited_by(just('('), just(')')),
        names,
    ));

    header
        .padded()
        .then_ignore(just("in"))
        .then_ignore(text::whitespace().at_least(1))
        .then(
            any()
                .repeated()
                .at_least(1)
                .to_slice()
                .map_with(|text: &str, extra| Spanned::trimmed(text, extra.span())),
        )
        .then_ignore(end())
        .map(|((item, index), source)| IterationHeader { item, index, source })
}

fn actions<'src>() -> impl Parser<'src, &'src str, Vec<ActionSyntax>, extra::Err<ParseError<'src>>> {
    let assign = name()
        .padded()
        .then_ignore(just('=').then(just('=').not()))
        .then(expression_text(";"))
        .map(|(target, value)| ActionSyntax::Assign { target, value });

    let argument = expression_text(",;").map(|text| {
        if text.node == EVENT_ARGUMENT {
            ArgumentSyntax::Event
        } else {
            ArgumentSyntax::Expression(text)
        }
    });

    let invoke = name()
        .padded()
        .then(
            argument
                .separated_by(just(','))
                .collect::<Vec<_>>()
                .then_ignore(text::whitespace())
                .delimited_by(just('('), just(')'))
                .or_not(),
        )
        .then_ignore(text::whitespace())
        .map(|(method, arguments)| ActionSyntax::Invoke {
            method,
            arguments: arguments.unwrap_or_default(),
        });

    choice((assign, invoke))
        .or_not()
        .padded()
        .separated_by(just(';'))
        .collect::<Vec<_>>()
        .then_ignore(end())
        .map(|actions| actions.into_iter().flatten().collect())
}
