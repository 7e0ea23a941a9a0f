//! HTML-subset markup parser.
//!
//! Elements, quoted, unquoted and valueless attributes, void and self-closing
//! elements, comments, doctype and basic entities. Anything more is out of
//! reach of templates and not parsed.

use ariadne::{Config, Label, Report, ReportKind, Source};
use chumsky::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

pub type Span = SimpleSpan;
pub type ParseError<'src> = Rich<'src, char, Span>;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Markup {
    Element(MarkupElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupElement {
    /// Lowercased tag name.
    pub tag: String,
    /// Attributes in source order; valueless attributes hold `""`.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Markup>,
}

/// Elements that never have children or a closing tag.
pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// One parse failure and where it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkupIssue {
    pub message: String,
    pub span: Range<usize>,
}

/// Markup that could not be parsed, with the offending byte ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkupError {
    pub source: String,
    pub issues: Vec<MarkupIssue>,
}

impl MarkupError {
    /// Renders every issue as an ariadne report against the markup source.
    pub fn report(&self, filename: &str) -> String {
        let mut output = String::new();
        for issue in &self.issues {
            let mut bytes = Vec::new();
            let written = Report::build(ReportKind::Error, (filename, issue.span.clone()))
                .with_config(Config::default().with_color(false))
                .with_message(&issue.message)
                .with_label(Label::new((filename, issue.span.clone())).with_message(&issue.message))
                .finish()
                .write((filename, Source::from(self.source.as_str())), &mut bytes);
            match written {
                Ok(()) => output.push_str(&String::from_utf8_lossy(&bytes)),
                Err(_) => output.push_str(&format!("{}: {}\n", filename, issue.message)),
            }
        }
        output
    }
}

impl fmt::Display for MarkupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.issues.first() {
            Some(issue) => write!(
                f,
                "invalid markup at {}..{}: {}",
                issue.span.start, issue.span.end, issue.message
            ),
            None => write!(f, "invalid markup"),
        }
    }
}

impl std::error::Error for MarkupError {}

pub fn parse_markup(source: &str) -> Result<Vec<Markup>, MarkupError> {
    parser()
        .then_ignore(end())
        .parse(source)
        .into_result()
        .map_err(|errors| MarkupError {
            source: source.to_string(),
            issues: errors
                .into_iter()
                .map(|error| MarkupIssue {
                    message: error.to_string(),
                    span: error.span().into_range(),
                })
                .collect(),
        })
}

fn parser<'src>() -> impl Parser<'src, &'src str, Vec<Markup>, extra::Err<ParseError<'src>>> {
    let tag_name = any()
        .filter(|character: &char| character.is_ascii_alphanumeric() || *character == '-')
        .repeated()
        .at_least(1)
        .to_slice()
        .map(|tag: &str| tag.to_ascii_lowercase());

    let attribute_name = any()
        .filter(|character: &char| {
            !character.is_whitespace() && !matches!(character, '"' | '\'' | '=' | '<' | '>' | '/')
        })
        .repeated()
        .at_least(1)
        .to_slice();

    let attribute_value = choice((
        just('"')
            .ignore_then(none_of('"').repeated().to_slice())
            .then_ignore(just('"')),
        just('\'')
            .ignore_then(none_of('\'').repeated().to_slice())
            .then_ignore(just('\'')),
        none_of(" \t\r\n\"'=<>`").repeated().at_least(1).to_slice(),
    ));

    let attribute = attribute_name
        .then(
            just('=')
                .padded()
                .ignore_then(attribute_value)
                .or_not(),
        )
        .map(|(name, value): (&str, Option<&str>)| {
            (name.to_string(), decode_entities(value.unwrap_or_default()))
        });

    let attributes = text::whitespace()
        .at_least(1)
        .ignore_then(attribute)
        .repeated()
        .collect::<Vec<_>>();

    let comment = just("<!--")
        .then(any().and_is(just("-->").not()).repeated())
        .then(just("-->"))
        .ignored();

    let doctype = just("<!")
        .then(none_of('>').repeated())
        .then(just('>'))
        .ignored();

    // `<` only opens a tag when a name, `/` or `!` follows it.
    let text = choice((
        none_of('<').ignored(),
        just('<')
            .then(
                any()
                    .filter(|character: &char| {
                        !character.is_ascii_alphabetic() && !matches!(character, '/' | '!')
                    })
                    .rewind(),
            )
            .ignored(),
    ))
    .repeated()
    .at_least(1)
    .to_slice()
    .map(|text: &str| Markup::Text(decode_entities(text)));

    recursive(|nodes| {
        let void_element = just('<')
            .ignore_then(tag_name.clone().filter(|tag: &String| is_void_element(tag)))
            .then(attributes.clone())
            .then_ignore(text::whitespace())
            .then_ignore(just('/').or_not())
            .then_ignore(just('>'))
            .map(|(tag, attributes)| MarkupElement {
                tag,
                attributes,
                children: Vec::new(),
            });

        let element = just('<')
            .ignore_then(tag_name.clone())
            .then(attributes.clone())
            .then_ignore(text::whitespace())
            .then(choice((
                just("/>").to(None),
                just('>')
                    .ignore_then(nodes)
                    .then_ignore(just("</"))
                    .then(tag_name.clone())
                    .then_ignore(text::whitespace())
                    .then_ignore(just('>'))
                    .map(Some),
            )))
            .try_map(|((tag, attributes), body), span| match body {
                None => Ok(MarkupElement {
                    tag,
                    attributes,
                    children: Vec::new(),
                }),
                Some((children, closing)) if closing == tag => Ok(MarkupElement {
                    tag,
                    attributes,
                    children,
                }),
                Some((_, closing)) => Err(ParseError::custom(
                    span,
                    format!("expected `</{tag}>`, found `</{closing}>`"),
                )),
            });

        choice((
            comment.to(None::<Markup>),
            doctype.to(None::<Markup>),
            void_element.map(|element| Some(Markup::Element(element))),
            element.map(|element| Some(Markup::Element(element))),
            text.map(Some),
        ))
        .repeated()
        .collect::<Vec<_>>()
        .map(|nodes| nodes.into_iter().flatten().collect::<Vec<_>>())
    })
}

pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(markup: &Markup) -> &MarkupElement {
        match markup {
            Markup::Element(element) => element,
            Markup::Text(text) => panic!("expected element, found text {text:?}"),
        }
    }

    fn attribute<'a>(element: &'a MarkupElement, name: &str) -> Option<&'a str> {
        element
            .attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, value)| value.as_str())
    }

    #[test]
    fn parses_nested_elements_with_attributes() {
        let nodes = parse_markup(r#"<div id="popup" class='a b'><span v-if="show">{{ word }}</span></div>"#)
            .unwrap();
        assert_eq!(nodes.len(), 1);
        let div = element(&nodes[0]);
        assert_eq!(div.tag, "div");
        assert_eq!(attribute(div, "id"), Some("popup"));
        assert_eq!(attribute(div, "class"), Some("a b"));
        let span = element(&div.children[0]);
        assert_eq!(attribute(span, "v-if"), Some("show"));
        assert_eq!(span.children, vec![Markup::Text("{{ word }}".to_string())]);
    }

    #[test]
    fn keeps_directive_attribute_names() {
        let nodes = parse_markup(
            r#"<a @click="send(word, $event)" v-bind:class="{'@@hidden': !show}" disabled>x</a>"#,
        )
        .unwrap();
        let anchor = element(&nodes[0]);
        assert_eq!(attribute(anchor, "@click"), Some("send(word, $event)"));
        assert_eq!(attribute(anchor, "v-bind:class"), Some("{'@@hidden': !show}"));
        assert_eq!(attribute(anchor, "disabled"), Some(""));
    }

    #[test]
    fn void_and_self_closing_elements_have_no_children() {
        let nodes = parse_markup("<p>a<br>b<img src=x.png/><i/></p>").unwrap();
        let paragraph = element(&nodes[0]);
        let tags: Vec<_> = paragraph
            .children
            .iter()
            .filter_map(|child| match child {
                Markup::Element(element) => Some(element.tag.as_str()),
                Markup::Text(_) => None,
            })
            .collect();
        assert_eq!(tags, vec!["br", "img", "i"]);
    }

    #[test]
    fn comparison_inside_text_is_not_a_tag() {
        let nodes = parse_markup("<b>{{ a < 3 }}</b>").unwrap();
        assert_eq!(
            element(&nodes[0]).children,
            vec![Markup::Text("{{ a < 3 }}".to_string())]
        );
    }

    #[test]
    fn drops_comments_and_decodes_entities() {
        let nodes = parse_markup("<!-- note --><p>&lt;b&gt; &amp; co</p>").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(
            element(&nodes[0]).children,
            vec![Markup::Text("<b> & co".to_string())]
        );
    }

    #[test]
    fn mismatched_closing_tag_is_reported() {
        let error = parse_markup("<div><span></div></span>").unwrap_err();
        assert!(!error.issues.is_empty());
        let report = error.report("template.html");
        assert!(report.contains("template.html"));
    }
}
