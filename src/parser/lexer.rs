//! Lexer for Jakefile Source
//!
//! Indent-sensitive tokenizer. It handles:
//! - Synthetic INDENT/DEDENT/NEWLINE tokens driven by an indentation stack
//! - Structural tokens for assignments, imports, directives, and headers
//! - Raw command-line capture inside recipe bodies (with `@`/`-` prefixes)
//! - Strings (single, double, triple), backtick commands, shell variables
//! - Backslash-newline continuation and `#` comments
//!
//! The lexer is line-modal: at the start of each logical line it decides
//! whether the line is structural (top level, directive) or a raw command
//! line (recipe body), and lexes accordingly. Command text keeps `{{…}}`,
//! `$VAR`, and backticks verbatim for the execution stage.

use std::collections::HashMap;

/// Token types for the Jakefile lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // End of input
    Eof,

    // Layout
    Newline,
    Indent,
    Dedent,

    // Words and identifiers
    Identifier,
    Word,
    Number,
    Str,
    Backtick,
    ShellVar,

    // `@name`
    Directive,

    // Raw command text (recipe bodies and hook tails)
    CommandText,
    AtPrefix,
    DashPrefix,

    // First-line `#!…`
    Shebang,

    // Operators
    Eq,      // =
    ColonEq, // :=
    Arrow,   // ->
    EqEq,    // ==
    NotEq,   // !=
    MatchOp, // =~
    Colon,   // :
    Comma,   // ,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Plus,  // + (concat)
    Slash, // / (path join)
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eof => "EOF",
            Self::Newline => "NEWLINE",
            Self::Indent => "INDENT",
            Self::Dedent => "DEDENT",
            Self::Identifier => "IDENTIFIER",
            Self::Word => "WORD",
            Self::Number => "NUMBER",
            Self::Str => "STRING",
            Self::Backtick => "BACKTICK",
            Self::ShellVar => "SHELL_VAR",
            Self::Directive => "DIRECTIVE",
            Self::CommandText => "COMMAND",
            Self::AtPrefix => "@",
            Self::DashPrefix => "-",
            Self::Shebang => "SHEBANG",
            Self::Eq => "=",
            Self::ColonEq => ":=",
            Self::Arrow => "->",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::MatchOp => "=~",
            Self::Colon => ":",
            Self::Comma => ",",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::Plus => "+",
            Self::Slash => "/",
        }
    }
}

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub value: String,
    pub line: usize,
    pub column: usize,
    /// For STRING tokens: single-quoted content is never interpolated
    pub single_quoted: bool,
    /// For STRING tokens: triple-quoted form
    pub triple: bool,
}

impl Token {
    pub fn new(token_type: TokenType, value: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            token_type,
            value: value.into(),
            line,
            column,
            single_quoted: false,
            triple: false,
        }
    }

    pub fn with_string_flags(mut self, single_quoted: bool, triple: bool) -> Self {
        self.single_quoted = single_quoted;
        self.triple = triple;
        self
    }
}

/// Error thrown when the lexer encounters invalid input
#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for LexError {}

impl LexError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// How a directive's arguments are lexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgMode {
    /// No arguments (trailing comment permitted)
    None,
    /// Everything to end-of-line is one COMMAND token
    RawTail,
    /// One name word, then the rest is one COMMAND token
    NameThenRawTail,
    /// Whitespace-separated words, strings, and `->`
    Words,
    /// Expression tokens (conditions)
    Expr,
    /// `NAME [= expression]`
    Export,
}

lazy_static::lazy_static! {
    /// Directives valid inside a recipe body, with their argument mode
    static ref BODY_DIRECTIVES: HashMap<&'static str, ArgMode> = {
        let mut m = HashMap::new();
        m.insert("if", ArgMode::Expr);
        m.insert("elif", ArgMode::Expr);
        m.insert("else", ArgMode::None);
        m.insert("end", ArgMode::None);
        m.insert("each", ArgMode::Words);
        m.insert("cd", ArgMode::Words);
        m.insert("cache", ArgMode::Words);
        m.insert("watch", ArgMode::Words);
        m.insert("confirm", ArgMode::Words);
        m.insert("ignore", ArgMode::None);
        m.insert("shell", ArgMode::Words);
        m.insert("needs", ArgMode::Words);
        m.insert("require", ArgMode::Words);
        m.insert("export", ArgMode::Export);
        m.insert("pre", ArgMode::RawTail);
        m.insert("post", ArgMode::RawTail);
        m
    };

    /// Directives valid at file scope (globals and recipe attributes)
    static ref TOP_DIRECTIVES: HashMap<&'static str, ArgMode> = {
        let mut m = HashMap::new();
        // globals
        m.insert("import", ArgMode::Words);
        m.insert("pre", ArgMode::RawTail);
        m.insert("post", ArgMode::RawTail);
        m.insert("on_error", ArgMode::RawTail);
        m.insert("before", ArgMode::NameThenRawTail);
        m.insert("after", ArgMode::NameThenRawTail);
        m.insert("dotenv", ArgMode::Words);
        m.insert("env_required", ArgMode::Words);
        m.insert("export", ArgMode::Export);
        // recipe attributes
        m.insert("default", ArgMode::None);
        m.insert("group", ArgMode::Words);
        m.insert("desc", ArgMode::Words);
        m.insert("description", ArgMode::Words);
        m.insert("alias", ArgMode::Words);
        m.insert("quiet", ArgMode::None);
        m.insert("only", ArgMode::Words);
        m.insert("only-os", ArgMode::Words);
        m.insert("platform", ArgMode::Words);
        m.insert("needs", ArgMode::Words);
        m
    };
}

/// Check if a string is a valid identifier
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '"' | '\'' | '`' | '#')
}

fn is_header_word_char(c: char) -> bool {
    is_word_char(c) && !matches!(c, ':' | ',' | '[' | ']' | '(' | ')' | '=')
}

fn is_expr_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '*' | '?')
}

/// Lexer for Jakefile source
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    /// Indentation stack: widths of enclosing levels with their indent char
    indent_stack: Vec<(usize, char)>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            indent_stack: Vec::new(),
        }
    }

    /// Tokenize a standalone expression snippet (the body of a `{{…}}`
    /// marker). No layout tokens are produced, only an EOF terminator.
    pub fn tokenize_expression(input: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(input);
        lexer.lex_expression_tokens()?;
        lexer.push(TokenType::Eof, "");
        Ok(lexer.tokens)
    }

    /// Tokenize the entire input
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        while self.pos < self.input.len() {
            if !self.begin_line()? {
                continue;
            }
            let depth = self.indent_stack.len();
            self.lex_line(depth)?;
        }

        // Close any open indentation levels
        while self.indent_stack.pop().is_some() {
            self.push(TokenType::Dedent, "");
        }
        self.push(TokenType::Eof, "");
        Ok(self.tokens)
    }

    // -------------------------------------------------------------------------
    // Line handling
    // -------------------------------------------------------------------------

    /// Measure indentation and emit INDENT/DEDENT. Returns false when the
    /// line was blank or comment-only (consumed without tokens).
    fn begin_line(&mut self) -> Result<bool, LexError> {
        let start_line = self.line;
        let mut width = 0usize;
        let mut indent_char: Option<char> = None;

        while let Some(c) = self.current() {
            match c {
                ' ' | '\t' => {
                    match indent_char {
                        None => indent_char = Some(c),
                        Some(prev) if prev != c => {
                            return Err(LexError::new(
                                "mixed tabs and spaces in indentation",
                                self.line,
                                self.column,
                            ));
                        }
                        _ => {}
                    }
                    width += 1;
                    self.advance();
                }
                _ => break,
            }
        }

        match self.current() {
            // Blank line: no tokens, no indent change
            None => return Ok(false),
            Some('\n') => {
                self.advance_newline();
                return Ok(false);
            }
            // Comment-only line
            Some('#') if !(start_line == 1 && self.peek(1) == Some('!')) => {
                self.skip_to_eol();
                if self.current() == Some('\n') {
                    self.advance_newline();
                }
                return Ok(false);
            }
            _ => {}
        }

        // Shebang only on the very first line
        if start_line == 1 && self.current() == Some('#') && self.peek(1) == Some('!') {
            let col = self.column;
            let start = self.pos;
            self.skip_to_eol();
            let value: String = self.input[start..self.pos].iter().collect();
            self.tokens
                .push(Token::new(TokenType::Shebang, value, start_line, col));
            self.finish_line();
            return Ok(false);
        }

        let current_width: usize = self.indent_stack.last().map(|(w, _)| *w).unwrap_or(0);

        if width > current_width {
            let c = indent_char.unwrap_or(' ');
            if let Some((_, enclosing)) = self.indent_stack.last() {
                if *enclosing != c {
                    return Err(LexError::new(
                        "mixed tabs and spaces in indentation",
                        self.line,
                        self.column,
                    ));
                }
            }
            self.indent_stack.push((width, c));
            self.push(TokenType::Indent, "");
        } else if width < current_width {
            while let Some((w, _)) = self.indent_stack.last() {
                if width < *w {
                    self.indent_stack.pop();
                    self.push(TokenType::Dedent, "");
                } else {
                    break;
                }
            }
            let landed = self.indent_stack.last().map(|(w, _)| *w).unwrap_or(0);
            if width != landed {
                return Err(LexError::new(
                    "unindent does not match any outer indentation level",
                    self.line,
                    self.column,
                ));
            }
        } else if width > 0 {
            // Same depth: indent char must stay consistent within the block
            if let (Some(c), Some((_, block_char))) = (indent_char, self.indent_stack.last()) {
                if c != *block_char {
                    return Err(LexError::new(
                        "mixed tabs and spaces in indentation",
                        self.line,
                        self.column,
                    ));
                }
            }
        }

        Ok(true)
    }

    fn lex_line(&mut self, depth: usize) -> Result<(), LexError> {
        if depth == 0 {
            self.lex_top_level_line()?;
        } else {
            self.lex_body_line()?;
        }
        self.finish_line();
        Ok(())
    }

    fn lex_top_level_line(&mut self) -> Result<(), LexError> {
        match self.current() {
            Some('@') => self.lex_directive_line(&TOP_DIRECTIVES, true),
            _ => {
                // `task`/`file` header, else an assignment
                let word = self.peek_bare_word();
                if word == "task" || word == "file" {
                    self.lex_header_line()
                } else {
                    self.lex_assignment_line()
                }
            }
        }
    }

    fn lex_body_line(&mut self) -> Result<(), LexError> {
        if self.current() == Some('@') {
            // `@name` is a directive only for known body-directive names;
            // otherwise `@` is the quiet prefix of a command line.
            let name = self.peek_directive_name();
            if BODY_DIRECTIVES.contains_key(name.as_str()) {
                return self.lex_directive_line(&BODY_DIRECTIVES, false);
            }
        }
        self.lex_command_line()
    }

    /// `@name` plus arguments per the directive's argument mode.
    fn lex_directive_line(
        &mut self,
        table: &HashMap<&'static str, ArgMode>,
        top_level: bool,
    ) -> Result<(), LexError> {
        let line = self.line;
        let column = self.column;
        self.advance(); // @
        let name = self.read_directive_name();
        if name.is_empty() {
            return Err(LexError::new("expected directive name after `@`", line, column));
        }

        let mode = match table.get(name.as_str()) {
            Some(mode) => *mode,
            None => {
                let scope = if top_level { "at file scope" } else { "in recipe body" };
                return Err(LexError::new(
                    format!("unknown directive `@{}` {}", name, scope),
                    line,
                    column,
                ));
            }
        };

        self.tokens
            .push(Token::new(TokenType::Directive, name, line, column));
        self.skip_inline_whitespace();

        match mode {
            ArgMode::None => self.expect_line_end(),
            ArgMode::RawTail => {
                self.lex_raw_tail()?;
                Ok(())
            }
            ArgMode::NameThenRawTail => {
                self.lex_word_token()?;
                self.skip_inline_whitespace();
                self.lex_raw_tail()?;
                Ok(())
            }
            ArgMode::Words => self.lex_word_args(),
            ArgMode::Expr => self.lex_expression_tokens(),
            ArgMode::Export => {
                let (line, column) = (self.line, self.column);
                let export_name = self.read_while(|c| c.is_ascii_alphanumeric() || c == '_');
                if !is_valid_identifier(&export_name) {
                    return Err(LexError::new(
                        "expected variable name after `@export`",
                        line,
                        column,
                    ));
                }
                self.tokens
                    .push(Token::new(TokenType::Identifier, export_name, line, column));
                self.skip_inline_whitespace();
                if self.current() == Some('=') && self.peek(1) != Some('=') {
                    self.push_advance(TokenType::Eq, "=", 1);
                    self.skip_inline_whitespace();
                    self.lex_expression_tokens()?;
                }
                self.expect_line_end()
            }
        }
    }

    /// `[task|file] name params? : [dep, …]?`
    fn lex_header_line(&mut self) -> Result<(), LexError> {
        loop {
            self.skip_inline_whitespace();
            let (line, column) = (self.line, self.column);
            match self.current() {
                None | Some('\n') => return Ok(()),
                Some('#') => {
                    self.skip_to_eol();
                    return Ok(());
                }
                Some('\\') if self.peek(1) == Some('\n') => {
                    self.consume_continuation();
                }
                Some(':') if self.peek(1) == Some('=') => {
                    return Err(LexError::new("unexpected `:=` in recipe header", line, column));
                }
                Some(':') => self.push_advance(TokenType::Colon, ":", 1),
                Some(',') => self.push_advance(TokenType::Comma, ",", 1),
                Some('[') => self.push_advance(TokenType::LBracket, "[", 1),
                Some(']') => self.push_advance(TokenType::RBracket, "]", 1),
                Some('(') => self.push_advance(TokenType::LParen, "(", 1),
                Some(')') => self.push_advance(TokenType::RParen, ")", 1),
                Some('=') => self.push_advance(TokenType::Eq, "=", 1),
                Some('"') | Some('\'') => {
                    let token = self.read_string()?;
                    self.tokens.push(token);
                }
                Some('`') => {
                    let token = self.read_backtick()?;
                    self.tokens.push(token);
                }
                Some('$') => {
                    let token = self.read_shell_var()?;
                    self.tokens.push(token);
                }
                Some(c) if is_header_word_char(c) => {
                    let word = self.read_while(is_header_word_char);
                    let token_type = if is_valid_identifier(&word) {
                        TokenType::Identifier
                    } else {
                        TokenType::Word
                    };
                    self.tokens.push(Token::new(token_type, word, line, column));
                }
                Some(c) => {
                    return Err(LexError::new(
                        format!("unexpected character `{}` in recipe header", c),
                        line,
                        column,
                    ));
                }
            }
        }
    }

    /// `name = expr` / `name := expr`
    fn lex_assignment_line(&mut self) -> Result<(), LexError> {
        let (line, column) = (self.line, self.column);
        let name = self.read_while(|c| c.is_ascii_alphanumeric() || c == '_');
        if name.is_empty() || !is_valid_identifier(&name) {
            return Err(LexError::new(
                "expected an assignment, directive, or recipe header",
                line,
                column,
            ));
        }
        self.tokens
            .push(Token::new(TokenType::Identifier, name, line, column));
        self.skip_inline_whitespace();

        match (self.current(), self.peek(1)) {
            (Some(':'), Some('=')) => self.push_advance(TokenType::ColonEq, ":=", 2),
            (Some('='), next) if next != Some('=') => self.push_advance(TokenType::Eq, "=", 1),
            _ => {
                return Err(LexError::new(
                    "expected `=` or `:=` after variable name",
                    self.line,
                    self.column,
                ));
            }
        }
        self.skip_inline_whitespace();
        self.lex_expression_tokens()
    }

    /// Command line: optional `@`/`-` prefixes (at most one of each, any
    /// order), then raw text to end of line.
    fn lex_command_line(&mut self) -> Result<(), LexError> {
        let mut seen_at = false;
        let mut seen_dash = false;
        loop {
            match self.current() {
                Some('@') if !seen_at => {
                    seen_at = true;
                    self.push_advance(TokenType::AtPrefix, "@", 1);
                }
                Some('-') if !seen_dash => {
                    seen_dash = true;
                    self.push_advance(TokenType::DashPrefix, "-", 1);
                }
                _ => break,
            }
            self.skip_inline_whitespace();
        }
        self.lex_raw_tail()?;
        Ok(())
    }

    /// Consume the rest of the logical line as one COMMAND token.
    fn lex_raw_tail(&mut self) -> Result<(), LexError> {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();

        while let Some(c) = self.current() {
            if c == '\n' {
                break;
            }
            if c == '\\' && self.peek(1) == Some('\n') {
                self.consume_continuation();
                if !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
                continue;
            }
            text.push(c);
            self.advance();
        }

        let text = text.trim_end().to_string();
        if !text.is_empty() {
            self.tokens
                .push(Token::new(TokenType::CommandText, text, line, column));
        }
        Ok(())
    }

    /// Words, strings, shell vars, and `->` until end of line.
    fn lex_word_args(&mut self) -> Result<(), LexError> {
        loop {
            self.skip_inline_whitespace();
            match self.current() {
                None | Some('\n') => return Ok(()),
                Some('#') => {
                    self.skip_to_eol();
                    return Ok(());
                }
                Some('\\') if self.peek(1) == Some('\n') => {
                    self.consume_continuation();
                }
                _ => {
                    self.lex_word_token()?;
                }
            }
        }
    }

    /// One word-mode token: string, backtick, shell var, `->`, or word.
    fn lex_word_token(&mut self) -> Result<(), LexError> {
        let (line, column) = (self.line, self.column);
        match self.current() {
            Some('"') | Some('\'') => {
                let token = self.read_string()?;
                self.tokens.push(token);
                Ok(())
            }
            Some('`') => {
                let token = self.read_backtick()?;
                self.tokens.push(token);
                Ok(())
            }
            Some('$') => {
                let token = self.read_shell_var()?;
                self.tokens.push(token);
                Ok(())
            }
            Some('-') if self.peek(1) == Some('>') && !matches!(self.peek(2), Some(c) if is_word_char(c)) =>
            {
                self.push_advance(TokenType::Arrow, "->", 2);
                Ok(())
            }
            Some(c) if is_word_char(c) => {
                let word = self.read_while(is_word_char);
                let token_type = if is_valid_identifier(&word) {
                    TokenType::Identifier
                } else {
                    TokenType::Word
                };
                self.tokens.push(Token::new(token_type, word, line, column));
                Ok(())
            }
            Some(c) => Err(LexError::new(
                format!("unexpected character `{}`", c),
                line,
                column,
            )),
            None => Err(LexError::new("unexpected end of line", line, column)),
        }
    }

    /// Expression tokens until end of line: strings, identifiers, numbers,
    /// calls, `+`/`/` operators, comparisons, shell vars, backticks.
    fn lex_expression_tokens(&mut self) -> Result<(), LexError> {
        loop {
            self.skip_inline_whitespace();
            let (line, column) = (self.line, self.column);
            match self.current() {
                None | Some('\n') => return Ok(()),
                Some('#') => {
                    self.skip_to_eol();
                    return Ok(());
                }
                Some('\\') if self.peek(1) == Some('\n') => {
                    self.consume_continuation();
                }
                Some('"') | Some('\'') => {
                    let token = self.read_string()?;
                    self.tokens.push(token);
                }
                Some('`') => {
                    let token = self.read_backtick()?;
                    self.tokens.push(token);
                }
                Some('$') => {
                    let token = self.read_shell_var()?;
                    self.tokens.push(token);
                }
                Some('(') => self.push_advance(TokenType::LParen, "(", 1),
                Some(')') => self.push_advance(TokenType::RParen, ")", 1),
                Some(',') => self.push_advance(TokenType::Comma, ",", 1),
                Some('+') => self.push_advance(TokenType::Plus, "+", 1),
                Some('/') => self.push_advance(TokenType::Slash, "/", 1),
                Some('=') if self.peek(1) == Some('=') => {
                    self.push_advance(TokenType::EqEq, "==", 2)
                }
                Some('=') if self.peek(1) == Some('~') => {
                    self.push_advance(TokenType::MatchOp, "=~", 2)
                }
                Some('!') if self.peek(1) == Some('=') => {
                    self.push_advance(TokenType::NotEq, "!=", 2)
                }
                Some(c) if c.is_ascii_digit() => {
                    let number = self.read_while(|c| c.is_ascii_digit() || c == '.');
                    self.tokens
                        .push(Token::new(TokenType::Number, number, line, column));
                }
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    let word = self.read_while(is_expr_word_char);
                    let token_type = if is_valid_identifier(&word) {
                        TokenType::Identifier
                    } else {
                        TokenType::Word
                    };
                    self.tokens.push(Token::new(token_type, word, line, column));
                }
                Some(c) => {
                    return Err(LexError::new(
                        format!("unexpected character `{}` in expression", c),
                        line,
                        column,
                    ));
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Token readers
    // -------------------------------------------------------------------------

    /// Read `'…'`, `"…"`, `'''…'''`, or `"""…"""`.
    fn read_string(&mut self) -> Result<Token, LexError> {
        let (line, column) = (self.line, self.column);
        let quote = self.current().unwrap();
        let single = quote == '\'';

        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        let closer_len = if triple { 3 } else { 1 };
        for _ in 0..closer_len {
            self.advance();
        }

        let mut value = String::new();
        loop {
            let c = match self.current() {
                Some(c) => c,
                None => {
                    return Err(LexError::new(
                        format!("unterminated string (expected closing `{}`)", quote),
                        line,
                        column,
                    ));
                }
            };

            if !triple && c == '\n' {
                return Err(LexError::new(
                    format!("unterminated string (expected closing `{}`)", quote),
                    line,
                    column,
                ));
            }

            if c == quote {
                if !triple {
                    self.advance();
                    break;
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    for _ in 0..3 {
                        self.advance();
                    }
                    break;
                }
                value.push(c);
                self.advance();
                continue;
            }

            if c == '\\' && !single {
                match self.peek(1) {
                    Some('n') => {
                        value.push('\n');
                        self.advance();
                        self.advance();
                        continue;
                    }
                    Some('t') => {
                        value.push('\t');
                        self.advance();
                        self.advance();
                        continue;
                    }
                    Some('\\') => {
                        value.push('\\');
                        self.advance();
                        self.advance();
                        continue;
                    }
                    Some('"') => {
                        value.push('"');
                        self.advance();
                        self.advance();
                        continue;
                    }
                    _ => {}
                }
            }
            if c == '\\' && single && self.peek(1) == Some('\'') {
                value.push('\'');
                self.advance();
                self.advance();
                continue;
            }

            value.push(c);
            if c == '\n' {
                self.advance_newline();
            } else {
                self.advance();
            }
        }

        Ok(Token::new(TokenType::Str, value, line, column).with_string_flags(single, triple))
    }

    /// Read `` `…` `` or ` ```…``` `.
    fn read_backtick(&mut self) -> Result<Token, LexError> {
        let (line, column) = (self.line, self.column);
        let triple = self.peek(1) == Some('`') && self.peek(2) == Some('`');
        let closer_len = if triple { 3 } else { 1 };
        for _ in 0..closer_len {
            self.advance();
        }

        let mut value = String::new();
        loop {
            let c = match self.current() {
                Some(c) => c,
                None => {
                    return Err(LexError::new("unterminated backtick command", line, column));
                }
            };
            if !triple && c == '\n' {
                return Err(LexError::new("unterminated backtick command", line, column));
            }
            if c == '`' {
                if !triple {
                    self.advance();
                    break;
                }
                if self.peek(1) == Some('`') && self.peek(2) == Some('`') {
                    for _ in 0..3 {
                        self.advance();
                    }
                    break;
                }
            }
            value.push(c);
            if c == '\n' {
                self.advance_newline();
            } else {
                self.advance();
            }
        }

        Ok(Token::new(TokenType::Backtick, value, line, column))
    }

    /// Read `$VAR`, `${VAR}`, `$1`, or `$@`. The token value is the bare
    /// name (`VAR`, `1`, `@`).
    fn read_shell_var(&mut self) -> Result<Token, LexError> {
        let (line, column) = (self.line, self.column);
        self.advance(); // $

        match self.current() {
            Some('{') => {
                self.advance();
                let name = self.read_while(|c| c.is_ascii_alphanumeric() || c == '_');
                if self.current() != Some('}') {
                    return Err(LexError::new("unterminated `${`", line, column));
                }
                self.advance();
                if name.is_empty() {
                    return Err(LexError::new("empty `${}` reference", line, column));
                }
                Ok(Token::new(TokenType::ShellVar, name, line, column))
            }
            Some('@') => {
                self.advance();
                Ok(Token::new(TokenType::ShellVar, "@", line, column))
            }
            Some(c) if c.is_ascii_digit() => {
                self.advance();
                Ok(Token::new(TokenType::ShellVar, c.to_string(), line, column))
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let name = self.read_while(|c| c.is_ascii_alphanumeric() || c == '_');
                Ok(Token::new(TokenType::ShellVar, name, line, column))
            }
            _ => Err(LexError::new("expected variable name after `$`", line, column)),
        }
    }

    // -------------------------------------------------------------------------
    // Scanner primitives
    // -------------------------------------------------------------------------

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            self.pos += 1;
            self.column += 1;
        }
    }

    fn advance_newline(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.column = 1;
    }

    fn push(&mut self, token_type: TokenType, value: &str) {
        self.tokens
            .push(Token::new(token_type, value, self.line, self.column));
    }

    fn push_advance(&mut self, token_type: TokenType, value: &str, len: usize) {
        self.push(token_type, value);
        for _ in 0..len {
            self.advance();
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while matches!(self.current(), Some(' ') | Some('\t')) {
            self.advance();
        }
    }

    fn skip_to_eol(&mut self) {
        while let Some(c) = self.current() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Consume `\` + newline + leading whitespace of the next line.
    fn consume_continuation(&mut self) {
        self.advance(); // backslash
        self.advance_newline();
        self.skip_inline_whitespace();
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.current() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.advance();
        }
        out
    }

    /// Peek the directive name after `@` without consuming.
    fn peek_directive_name(&self) -> String {
        let mut out = String::new();
        let mut i = self.pos + 1;
        while let Some(&c) = self.input.get(i) {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                out.push(c);
                i += 1;
            } else {
                break;
            }
        }
        out
    }

    fn read_directive_name(&mut self) -> String {
        self.read_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    /// Peek the bare word at the cursor without consuming.
    fn peek_bare_word(&self) -> String {
        let mut out = String::new();
        let mut i = self.pos;
        while let Some(&c) = self.input.get(i) {
            if c.is_ascii_alphanumeric() || c == '_' {
                out.push(c);
                i += 1;
            } else {
                break;
            }
        }
        out
    }

    /// Only whitespace or a comment may remain on the line.
    fn expect_line_end(&mut self) -> Result<(), LexError> {
        self.skip_inline_whitespace();
        match self.current() {
            None | Some('\n') => Ok(()),
            Some('#') => {
                self.skip_to_eol();
                Ok(())
            }
            Some(c) => Err(LexError::new(
                format!("unexpected `{}` after directive", c),
                self.line,
                self.column,
            )),
        }
    }

    /// Consume the newline (if any) and emit a NEWLINE token.
    fn finish_line(&mut self) {
        self.skip_inline_whitespace();
        if self.current() == Some('#') {
            self.skip_to_eol();
        }
        self.push(TokenType::Newline, "\n");
        if self.current() == Some('\n') {
            self.advance_newline();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(input: &str) -> Vec<Token> {
        Lexer::new(input).tokenize().unwrap()
    }

    fn types(tokens: &[Token]) -> Vec<TokenType> {
        tokens.iter().map(|t| t.token_type).collect()
    }

    #[test]
    fn test_assignment() {
        let tokens = lex("name = \"world\"\n");
        assert_eq!(
            types(&tokens),
            vec![
                TokenType::Identifier,
                TokenType::Eq,
                TokenType::Str,
                TokenType::Newline,
                TokenType::Eof
            ]
        );
        assert_eq!(tokens[0].value, "name");
        assert_eq!(tokens[2].value, "world");
    }

    #[test]
    fn test_colon_eq_assignment() {
        let tokens = lex("greeting := \"hi\"\n");
        assert_eq!(tokens[1].token_type, TokenType::ColonEq);
    }

    #[test]
    fn test_header_tokens() {
        let tokens = lex("task build p1 p2=\"x\": [deps, lint]\n");
        assert_eq!(tokens[0].value, "task");
        assert_eq!(tokens[1].value, "build");
        let tt = types(&tokens);
        assert!(tt.contains(&TokenType::Colon));
        assert!(tt.contains(&TokenType::LBracket));
        assert!(tt.contains(&TokenType::Comma));
        assert!(tt.contains(&TokenType::RBracket));
    }

    #[test]
    fn test_body_indent_dedent() {
        let tokens = lex("task build:\n    echo hi\n");
        let tt = types(&tokens);
        assert!(tt.contains(&TokenType::Indent));
        assert!(tt.contains(&TokenType::CommandText));
        assert!(tt.contains(&TokenType::Dedent));
        let cmd = tokens
            .iter()
            .find(|t| t.token_type == TokenType::CommandText)
            .unwrap();
        assert_eq!(cmd.value, "echo hi");
    }

    #[test]
    fn test_mixed_indent_is_error() {
        let err = Lexer::new("task build:\n    echo a\n\techo b\n")
            .tokenize()
            .unwrap_err();
        assert!(err.message.contains("mixed tabs and spaces"));
    }

    #[test]
    fn test_command_prefixes() {
        let tokens = lex("task t:\n    @- rm -f junk\n");
        let tt = types(&tokens);
        let at = tt.iter().position(|t| *t == TokenType::AtPrefix).unwrap();
        assert_eq!(tt[at + 1], TokenType::DashPrefix);
        let cmd = tokens
            .iter()
            .find(|t| t.token_type == TokenType::CommandText)
            .unwrap();
        assert_eq!(cmd.value, "rm -f junk");
    }

    #[test]
    fn test_quiet_prefix_vs_directive() {
        // `@echo` is a quiet command, `@cd` is a directive
        let tokens = lex("task t:\n    @echo hi\n    @cd src\n");
        assert!(types(&tokens).contains(&TokenType::AtPrefix));
        let directive = tokens
            .iter()
            .find(|t| t.token_type == TokenType::Directive)
            .unwrap();
        assert_eq!(directive.value, "cd");
    }

    #[test]
    fn test_if_condition_tokens() {
        let tokens = lex("task t:\n    @if eq(env(\"E\"), \"prod\")\n    echo p\n    @end\n");
        let directive = tokens
            .iter()
            .find(|t| t.token_type == TokenType::Directive)
            .unwrap();
        assert_eq!(directive.value, "if");
        assert!(types(&tokens).contains(&TokenType::LParen));
        assert!(types(&tokens).contains(&TokenType::Comma));
    }

    #[test]
    fn test_infix_operators() {
        let tokens = lex("task t:\n    @if $ENV == \"prod\"\n    echo p\n    @end\n");
        assert!(types(&tokens).contains(&TokenType::EqEq));
        assert!(types(&tokens).contains(&TokenType::ShellVar));
    }

    #[test]
    fn test_needs_arrow() {
        let tokens = lex("task t:\n    @needs kubectl -> install_kubectl\n");
        assert!(types(&tokens).contains(&TokenType::Arrow));
    }

    #[test]
    fn test_line_continuation_in_command() {
        let tokens = lex("task t:\n    echo one \\\n        two\n");
        let cmd = tokens
            .iter()
            .find(|t| t.token_type == TokenType::CommandText)
            .unwrap();
        assert_eq!(cmd.value, "echo one two");
    }

    #[test]
    fn test_single_quoted_string_is_raw() {
        let tokens = lex("msg = 'keep {{this}}'\n");
        let s = tokens.iter().find(|t| t.token_type == TokenType::Str).unwrap();
        assert!(s.single_quoted);
        assert_eq!(s.value, "keep {{this}}");
    }

    #[test]
    fn test_triple_string_spans_lines() {
        let tokens = lex("msg = \"\"\"line one\nline two\"\"\"\n");
        let s = tokens.iter().find(|t| t.token_type == TokenType::Str).unwrap();
        assert!(s.triple);
        assert_eq!(s.value, "line one\nline two");
    }

    #[test]
    fn test_backtick_command() {
        let tokens = lex("sha = `git rev-parse HEAD`\n");
        let b = tokens
            .iter()
            .find(|t| t.token_type == TokenType::Backtick)
            .unwrap();
        assert_eq!(b.value, "git rev-parse HEAD");
    }

    #[test]
    fn test_shebang_first_line_only() {
        let tokens = lex("#!/usr/bin/env jake\nname = \"x\"\n");
        assert_eq!(tokens[0].token_type, TokenType::Shebang);
        assert!(tokens[0].value.starts_with("#!"));
    }

    #[test]
    fn test_comments_not_emitted() {
        let tokens = lex("# a comment\nname = \"x\"  # trailing\n");
        assert!(!tokens.iter().any(|t| t.value.contains("comment")));
        assert!(!tokens.iter().any(|t| t.value.contains("trailing")));
    }

    #[test]
    fn test_command_text_keeps_shell_syntax() {
        let tokens = lex("task t:\n    echo $HOME `date` {{name}}\n");
        let cmd = tokens
            .iter()
            .find(|t| t.token_type == TokenType::CommandText)
            .unwrap();
        assert_eq!(cmd.value, "echo $HOME `date` {{name}}");
    }

    #[test]
    fn test_import_line() {
        let tokens = lex("@import \"lib/a.jake\" as a\n");
        assert_eq!(tokens[0].token_type, TokenType::Directive);
        assert_eq!(tokens[0].value, "import");
        assert_eq!(tokens[1].token_type, TokenType::Str);
        assert_eq!(tokens[1].value, "lib/a.jake");
        assert_eq!(tokens[2].value, "as");
        assert_eq!(tokens[3].value, "a");
    }

    #[test]
    fn test_before_hook_raw_tail() {
        let tokens = lex("@before build echo PRE\n");
        assert_eq!(tokens[0].value, "before");
        assert_eq!(tokens[1].value, "build");
        assert_eq!(tokens[2].token_type, TokenType::CommandText);
        assert_eq!(tokens[2].value, "echo PRE");
    }

    #[test]
    fn test_unindent_must_match() {
        let err = Lexer::new("task t:\n        echo a\n    echo b\n")
            .tokenize()
            .unwrap_err();
        assert!(err.message.contains("unindent"));
    }

    #[test]
    fn test_token_positions() {
        let tokens = lex("name = \"x\"\n");
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[0].column, 1);
        assert_eq!(tokens[1].column, 6);
    }
}
