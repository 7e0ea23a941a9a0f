//! The expression scanner.
//!
//! Four states (none, value, operator, string) and no lookahead. Everything
//! the parser needs is in the token kind and its source slice.

use crate::error::{CompileError, CompileErrorKind};
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A literal or a variable path, e.g. `12`, `true`, `item.x[1]`.
    Value,
    /// A run of operator characters, not yet checked against the operator set.
    Operator,
    /// A quoted string, quotes included.
    StringLiteral,
    /// `(` or `)`.
    Mark,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    /// Slice of the expression source.
    pub text: &'src str,
    /// Byte range of `text` in the source.
    pub span: Range<usize>,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    None,
    Value,
    Operator,
    String(char),
}

/// Characters that may appear in literals and variable paths.
pub fn is_value_char(character: char) -> bool {
    character.is_ascii_alphanumeric() || matches!(character, '.' | '_' | '[' | ']')
}

/// Characters that make up operator runs.
pub fn is_operator_char(character: char) -> bool {
    matches!(character, '-' | '+' | '<' | '=' | '>' | '&' | '|' | '!')
}

/// Splits an expression into tokens with a four-state scanner.
///
/// Value and operator runs are greedy, parentheses are always standalone
/// marks, and strings run to the next occurrence of their opening quote
/// (there are no escapes). Whitespace only separates tokens.
pub fn tokenize<'src>(source: &'src str) -> Result<Vec<Token<'src>>, CompileError> {
    let mut tokens = Vec::new();
    let mut state = ScanState::None;
    let mut start = 0;

    let close = move |tokens: &mut Vec<Token<'src>>, kind: TokenKind, start: usize, end: usize| {
        tokens.push(Token {
            kind,
            text: &source[start..end],
            span: start..end,
        });
    };

    for (offset, character) in source.char_indices() {
        match state {
            ScanState::Value if is_value_char(character) => continue,
            ScanState::Operator if is_operator_char(character) => continue,
            ScanState::String(quote) => {
                if character == quote {
                    close(&mut tokens, TokenKind::StringLiteral, start, offset + 1);
                    state = ScanState::None;
                }
                continue;
            }
            ScanState::Value => close(&mut tokens, TokenKind::Value, start, offset),
            ScanState::Operator => close(&mut tokens, TokenKind::Operator, start, offset),
            ScanState::None => {}
        }

        state = ScanState::None;
        start = offset;
        match character {
            '(' | ')' => close(&mut tokens, TokenKind::Mark, offset, offset + 1),
            '"' | '\'' => state = ScanState::String(character),
            character if is_value_char(character) => state = ScanState::Value,
            character if is_operator_char(character) => state = ScanState::Operator,
            character if character.is_whitespace() => {}
            character => {
                return Err(CompileError::new(
                    CompileErrorKind::UnexpectedCharacter(character),
                    source,
                    offset..offset + character.len_utf8(),
                ));
            }
        }
    }

    match state {
        ScanState::None => {}
        ScanState::Value => close(&mut tokens, TokenKind::Value, start, source.len()),
        ScanState::Operator => close(&mut tokens, TokenKind::Operator, start, source.len()),
        ScanState::String(_) => {
            return Err(CompileError::new(
                CompileErrorKind::UnterminatedString,
                source,
                start..source.len(),
            ));
        }
    }
    Ok(tokens)
}
