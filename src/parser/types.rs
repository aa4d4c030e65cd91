//! Parser Types and Constants
//!
//! Shared types and limits used across the lexer and parser.

use std::fmt;

use thiserror::Error;

use crate::parser::lexer::{LexError, Token};

// Parser limits to prevent hangs on malformed input
pub const MAX_INPUT_SIZE: usize = 1_000_000; // 1MB max input
pub const MAX_PARSE_ITERATIONS: usize = 1_000_000;

/// Whether the failure came from tokenization or from the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Lex,
    Parse,
}

#[derive(Debug, Error)]
pub struct ParseException {
    pub kind: ParseErrorKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub token: Option<Token>,
}

impl fmt::Display for ParseException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl ParseException {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind: ParseErrorKind::Parse,
            message: message.into(),
            line,
            column,
            token: None,
        }
    }

    pub fn with_token(message: impl Into<String>, token: &Token) -> Self {
        Self {
            kind: ParseErrorKind::Parse,
            message: message.into(),
            line: token.line,
            column: token.column,
            token: Some(token.clone()),
        }
    }
}

impl From<LexError> for ParseException {
    fn from(err: LexError) -> Self {
        Self {
            kind: ParseErrorKind::Lex,
            message: err.message,
            line: err.line,
            column: err.column,
            token: None,
        }
    }
}
