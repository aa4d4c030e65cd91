//! Recursive Descent Parser for Jakefiles
//!
//! Consumes tokens from the lexer and produces a `SourceFile` AST.
//!
//! Grammar (simplified):
//!   source      ::= item*
//!   item        ::= assignment | import | global_directive | recipe
//!   recipe      ::= attribute* header NEWLINE body?
//!   header      ::= ("task"|"file") name param* ":" deps?
//!   deps        ::= "[" name ("," name)* ","? "]"
//!   body        ::= INDENT body_item+ DEDENT
//!   body_item   ::= directive | command_line
//!
//! `@if`/`@each` blocks are logical blocks inside one indentation level,
//! tracked on the parser's call stack; a missing `@end` is reported at
//! the opening directive's position. The parser never synthesises an
//! implicit `@end`.

use crate::ast::types::{
    Assignment, BodyItem, CommandLine, CompareOp, Condition, Directive, Expression,
    GlobalDirective, IfBranch, IfDirective, Import, Item, Parameter, Position, Recipe,
    RecipeAttributes, RecipeKind, SourceFile, ToolNeed, Variadic,
};
use crate::parser::lexer::{is_valid_identifier, Lexer, Token, TokenType};
use crate::parser::types::{ParseException, MAX_INPUT_SIZE, MAX_PARSE_ITERATIONS};

/// Parse a complete Jakefile source string.
pub fn parse(input: &str) -> Result<SourceFile, ParseException> {
    if input.len() > MAX_INPUT_SIZE {
        return Err(ParseException::new(
            format!("input exceeds maximum size of {} bytes", MAX_INPUT_SIZE),
            1,
            1,
        ));
    }
    let tokens = Lexer::new(input).tokenize()?;
    Parser::new(tokens).parse_source()
}

/// Parse a single expression, as found inside `{{…}}` markers.
pub fn parse_expression_str(input: &str) -> Result<Expression, ParseException> {
    let tokens = Lexer::tokenize_expression(input)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression()?;
    if parser.current().token_type != TokenType::Eof {
        return Err(ParseException::with_token(
            format!("unexpected `{}` after expression", parser.current().value),
            parser.current(),
        ));
    }
    Ok(expr)
}

/// Attribute directives that may precede a recipe header.
const ATTRIBUTE_DIRECTIVES: &[&str] = &[
    "default",
    "group",
    "desc",
    "description",
    "alias",
    "quiet",
    "only",
    "only-os",
    "platform",
    "needs",
];

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    iterations: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            iterations: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Token cursor
    // -------------------------------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_type(&self) -> TokenType {
        self.current().token_type
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token_type: TokenType) -> Result<Token, ParseException> {
        if self.peek_type() == token_type {
            Ok(self.advance())
        } else {
            Err(ParseException::with_token(
                format!(
                    "expected {}, found {}",
                    token_type.as_str(),
                    self.peek_type().as_str()
                ),
                self.current(),
            ))
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_type(), TokenType::Newline | TokenType::Shebang) {
            self.advance();
        }
    }

    fn check_iteration_limit(&mut self) -> Result<(), ParseException> {
        self.iterations += 1;
        if self.iterations > MAX_PARSE_ITERATIONS {
            return Err(ParseException::with_token(
                "maximum parse iterations exceeded (possible infinite loop)",
                self.current(),
            ));
        }
        Ok(())
    }

    fn pos_of(token: &Token) -> Position {
        Position::new(token.line, token.column)
    }

    // -------------------------------------------------------------------------
    // Top level
    // -------------------------------------------------------------------------

    pub fn parse_source(&mut self) -> Result<SourceFile, ParseException> {
        let mut items = Vec::new();

        loop {
            self.check_iteration_limit()?;
            self.skip_newlines();
            match self.peek_type() {
                TokenType::Eof => break,
                TokenType::Directive => {
                    let name = self.current().value.clone();
                    if ATTRIBUTE_DIRECTIVES.contains(&name.as_str()) {
                        items.push(Item::Recipe(self.parse_recipe()?));
                    } else {
                        items.push(self.parse_global_directive()?);
                    }
                }
                TokenType::Identifier => {
                    let word = self.current().value.clone();
                    if word == "task" || word == "file" {
                        items.push(Item::Recipe(self.parse_recipe()?));
                    } else {
                        items.push(Item::Assignment(self.parse_assignment()?));
                    }
                }
                _ => {
                    return Err(ParseException::with_token(
                        format!(
                            "expected assignment, directive, or recipe header, found {}",
                            self.peek_type().as_str()
                        ),
                        self.current(),
                    ));
                }
            }
        }

        Ok(SourceFile { items })
    }

    fn parse_assignment(&mut self) -> Result<Assignment, ParseException> {
        let name_token = self.expect(TokenType::Identifier)?;
        match self.peek_type() {
            TokenType::Eq | TokenType::ColonEq => {
                self.advance();
            }
            _ => {
                return Err(ParseException::with_token(
                    "expected `=` or `:=` after variable name",
                    self.current(),
                ));
            }
        }
        let value = self.parse_expression()?;
        self.expect(TokenType::Newline)?;
        Ok(Assignment {
            name: name_token.value.clone(),
            value,
            pos: Self::pos_of(&name_token),
        })
    }

    // -------------------------------------------------------------------------
    // Global directives
    // -------------------------------------------------------------------------

    fn parse_global_directive(&mut self) -> Result<Item, ParseException> {
        let directive = self.advance();
        let pos = Self::pos_of(&directive);

        let item = match directive.value.as_str() {
            "import" => {
                let path = self.expect(TokenType::Str)?;
                let namespace = if self.peek_type() == TokenType::Identifier
                    && self.current().value == "as"
                {
                    self.advance();
                    let ns = self.expect_name("namespace")?;
                    Some(ns)
                } else {
                    None
                };
                Item::Import(Import {
                    path: path.value,
                    namespace,
                    pos,
                })
            }
            "pre" => Item::Global(GlobalDirective::Pre(self.parse_hook_command()?)),
            "post" => Item::Global(GlobalDirective::Post(self.parse_hook_command()?)),
            "on_error" => Item::Global(GlobalDirective::OnError(self.parse_hook_command()?)),
            "before" | "after" => {
                let recipe = self.expect_name("recipe name")?;
                let command = self.parse_hook_command()?;
                if directive.value == "before" {
                    Item::Global(GlobalDirective::Before { recipe, command })
                } else {
                    Item::Global(GlobalDirective::After { recipe, command })
                }
            }
            "dotenv" => {
                let path = match self.peek_type() {
                    TokenType::Str | TokenType::Word | TokenType::Identifier => {
                        self.advance().value
                    }
                    _ => {
                        return Err(ParseException::with_token(
                            "expected path after @dotenv",
                            self.current(),
                        ));
                    }
                };
                Item::Global(GlobalDirective::Dotenv { path, pos })
            }
            "env_required" => {
                let mut names = Vec::new();
                while self.peek_type() == TokenType::Identifier {
                    names.push(self.advance().value);
                }
                if names.is_empty() {
                    return Err(ParseException::with_token(
                        "expected variable names after @env_required",
                        self.current(),
                    ));
                }
                Item::Global(GlobalDirective::EnvRequired { names, pos })
            }
            "export" => {
                let (name, value) = self.parse_export_args()?;
                Item::Global(GlobalDirective::Export { name, value, pos })
            }
            other => {
                return Err(ParseException::with_token(
                    format!("unexpected directive `@{}` at file scope", other),
                    &directive,
                ));
            }
        };

        self.expect(TokenType::Newline)?;
        Ok(item)
    }

    /// Hook tail: a raw COMMAND token as a prefix-less command line.
    fn parse_hook_command(&mut self) -> Result<CommandLine, ParseException> {
        let token = self.expect(TokenType::CommandText)?;
        Ok(CommandLine {
            text: token.value.clone(),
            quiet: false,
            ignore_failure: false,
            pos: Self::pos_of(&token),
        })
    }

    fn parse_export_args(&mut self) -> Result<(String, Option<Expression>), ParseException> {
        let name = self.expect_name("variable name")?;
        let value = if self.peek_type() == TokenType::Eq {
            self.advance();
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok((name, value))
    }

    /// Accept an IDENTIFIER or WORD token and return its text.
    fn expect_name(&mut self, what: &str) -> Result<String, ParseException> {
        match self.peek_type() {
            TokenType::Identifier | TokenType::Word => Ok(self.advance().value),
            _ => Err(ParseException::with_token(
                format!("expected {}, found {}", what, self.peek_type().as_str()),
                self.current(),
            )),
        }
    }

    // -------------------------------------------------------------------------
    // Recipes
    // -------------------------------------------------------------------------

    fn parse_recipe(&mut self) -> Result<Recipe, ParseException> {
        let attributes = self.parse_attributes()?;

        let keyword = self.expect(TokenType::Identifier)?;
        let kind = match keyword.value.as_str() {
            "task" => RecipeKind::Task,
            "file" => RecipeKind::File,
            other => {
                return Err(ParseException::with_token(
                    format!("expected `task` or `file` recipe header, found `{}`", other),
                    &keyword,
                ));
            }
        };
        let pos = Self::pos_of(&keyword);
        let name = self.expect_name("recipe name")?;

        let parameters = self.parse_parameters()?;
        self.expect(TokenType::Colon)?;
        let dependencies = self.parse_dependencies()?;
        self.expect(TokenType::Newline)?;

        let body = if self.peek_type() == TokenType::Indent {
            self.advance();
            let (items, stop) = self.parse_block_items(&[])?;
            debug_assert!(stop.is_none());
            items
        } else {
            Vec::new()
        };

        Ok(Recipe {
            kind,
            name,
            namespace: None,
            parameters,
            dependencies,
            attributes,
            body,
            pos,
        })
    }

    fn parse_attributes(&mut self) -> Result<RecipeAttributes, ParseException> {
        let mut attrs = RecipeAttributes::default();

        loop {
            self.skip_newlines();
            if self.peek_type() != TokenType::Directive {
                break;
            }
            let name = self.current().value.clone();
            if !ATTRIBUTE_DIRECTIVES.contains(&name.as_str()) {
                return Err(ParseException::with_token(
                    format!("directive `@{}` cannot appear between recipe attributes", name),
                    self.current(),
                ));
            }
            let directive = self.advance();

            match directive.value.as_str() {
                "default" => attrs.is_default = true,
                "quiet" => attrs.quiet = true,
                "group" => attrs.group = Some(self.expect_text("group name")?),
                "desc" | "description" => attrs.desc = Some(self.expect_text("description")?),
                "alias" => {
                    while matches!(self.peek_type(), TokenType::Identifier | TokenType::Word) {
                        attrs.aliases.push(self.advance().value);
                    }
                    if attrs.aliases.is_empty() {
                        return Err(ParseException::with_token(
                            "expected alias name after @alias",
                            self.current(),
                        ));
                    }
                }
                "only" | "only-os" | "platform" => {
                    while matches!(self.peek_type(), TokenType::Identifier | TokenType::Word) {
                        attrs.platforms.push(self.advance().value);
                    }
                    if attrs.platforms.is_empty() {
                        return Err(ParseException::with_token(
                            "expected platform name after platform filter",
                            self.current(),
                        ));
                    }
                }
                "needs" => attrs.needs.extend(self.parse_tool_needs()?),
                _ => unreachable!("attribute table mismatch"),
            }
            self.expect(TokenType::Newline)?;
        }

        Ok(attrs)
    }

    /// A string or bare word argument.
    fn expect_text(&mut self, what: &str) -> Result<String, ParseException> {
        match self.peek_type() {
            TokenType::Str | TokenType::Identifier | TokenType::Word => Ok(self.advance().value),
            _ => Err(ParseException::with_token(
                format!("expected {}, found {}", what, self.peek_type().as_str()),
                self.current(),
            )),
        }
    }

    /// `cmd ["hint"] [-> install_recipe]`, repeated.
    fn parse_tool_needs(&mut self) -> Result<Vec<ToolNeed>, ParseException> {
        let mut needs = Vec::new();
        loop {
            match self.peek_type() {
                TokenType::Identifier | TokenType::Word => {
                    let command = self.advance().value;
                    let hint = if self.peek_type() == TokenType::Str {
                        Some(self.advance().value)
                    } else {
                        None
                    };
                    let install_recipe = if self.peek_type() == TokenType::Arrow {
                        self.advance();
                        Some(self.expect_name("install recipe")?)
                    } else {
                        None
                    };
                    needs.push(ToolNeed {
                        command,
                        hint,
                        install_recipe,
                    });
                }
                _ => break,
            }
        }
        if needs.is_empty() {
            return Err(ParseException::with_token(
                "expected tool name after @needs",
                self.current(),
            ));
        }
        Ok(needs)
    }

    fn parse_parameters(&mut self) -> Result<Vec<Parameter>, ParseException> {
        let mut parameters: Vec<Parameter> = Vec::new();

        while matches!(self.peek_type(), TokenType::Identifier | TokenType::Word) {
            let token = self.advance();
            let (variadic, name) = if let Some(rest) = token.value.strip_prefix('+') {
                (Variadic::OneOrMore, rest.to_string())
            } else if let Some(rest) = token.value.strip_prefix('*') {
                (Variadic::ZeroOrMore, rest.to_string())
            } else {
                (Variadic::None, token.value.clone())
            };

            if !is_valid_identifier(&name) {
                return Err(ParseException::with_token(
                    format!("invalid parameter name `{}`", name),
                    &token,
                ));
            }

            let default = if self.peek_type() == TokenType::Eq {
                self.advance();
                Some(self.parse_primary()?)
            } else {
                None
            };

            if default.is_none()
                && parameters.iter().any(|p| p.default.is_some())
            {
                return Err(ParseException::with_token(
                    format!(
                        "parameter `{}` without a default follows a defaulted parameter",
                        name
                    ),
                    &token,
                ));
            }
            if let Some(prev) = parameters.iter().find(|p| p.variadic != Variadic::None) {
                return Err(ParseException::with_token(
                    format!(
                        "variadic parameter `{}` must be the final parameter",
                        prev.name
                    ),
                    &token,
                ));
            }

            parameters.push(Parameter {
                name,
                default,
                variadic,
            });
        }

        Ok(parameters)
    }

    fn parse_dependencies(&mut self) -> Result<Vec<String>, ParseException> {
        let mut deps = Vec::new();
        if self.peek_type() != TokenType::LBracket {
            return Ok(deps);
        }
        self.advance();

        loop {
            self.check_iteration_limit()?;
            match self.peek_type() {
                TokenType::RBracket => {
                    self.advance();
                    break;
                }
                TokenType::Identifier | TokenType::Word => {
                    deps.push(self.advance().value);
                    match self.peek_type() {
                        TokenType::Comma => {
                            self.advance();
                        }
                        TokenType::RBracket => {}
                        _ => {
                            return Err(ParseException::with_token(
                                "expected `,` or `]` in dependency list",
                                self.current(),
                            ));
                        }
                    }
                }
                _ => {
                    return Err(ParseException::with_token(
                        "expected dependency name or `]`",
                        self.current(),
                    ));
                }
            }
        }

        Ok(deps)
    }

    // -------------------------------------------------------------------------
    // Recipe bodies
    // -------------------------------------------------------------------------

    /// Parse body items until DEDENT (stop empty) or until one of the given
    /// block-closing directives is consumed. Returns the items and which
    /// closer was seen (None for DEDENT).
    fn parse_block_items(
        &mut self,
        closers: &[&str],
    ) -> Result<(Vec<BodyItem>, Option<String>), ParseException> {
        let mut items = Vec::new();

        loop {
            self.check_iteration_limit()?;
            match self.peek_type() {
                TokenType::Newline => {
                    self.advance();
                }
                TokenType::Dedent | TokenType::Eof => {
                    if self.peek_type() == TokenType::Dedent {
                        self.advance();
                    }
                    return Ok((items, None));
                }
                TokenType::Indent => {
                    return Err(ParseException::with_token(
                        "unexpected indent inside recipe body",
                        self.current(),
                    ));
                }
                TokenType::Directive => {
                    let name = self.current().value.clone();
                    if closers.contains(&name.as_str()) {
                        self.advance();
                        return Ok((items, Some(name)));
                    }
                    if matches!(name.as_str(), "elif" | "else" | "end") {
                        return Err(ParseException::with_token(
                            format!("`@{}` without a matching `@if` or `@each`", name),
                            self.current(),
                        ));
                    }
                    items.push(BodyItem::Directive(self.parse_body_directive()?));
                }
                TokenType::AtPrefix | TokenType::DashPrefix | TokenType::CommandText => {
                    items.push(BodyItem::Command(self.parse_command_line()?));
                }
                other => {
                    return Err(ParseException::with_token(
                        format!("unexpected {} in recipe body", other.as_str()),
                        self.current(),
                    ));
                }
            }
        }
    }

    fn parse_command_line(&mut self) -> Result<CommandLine, ParseException> {
        let start = self.current().clone();
        let mut quiet = false;
        let mut ignore_failure = false;

        loop {
            match self.peek_type() {
                TokenType::AtPrefix => {
                    quiet = true;
                    self.advance();
                }
                TokenType::DashPrefix => {
                    ignore_failure = true;
                    self.advance();
                }
                _ => break,
            }
        }

        let text = self.expect(TokenType::CommandText)?;
        self.expect(TokenType::Newline)?;
        Ok(CommandLine {
            text: text.value,
            quiet,
            ignore_failure,
            pos: Self::pos_of(&start),
        })
    }

    fn parse_body_directive(&mut self) -> Result<Directive, ParseException> {
        let directive = self.advance();

        let parsed = match directive.value.as_str() {
            "if" => return self.parse_if_directive(&directive),
            "each" => return self.parse_each_directive(&directive),
            "cd" => Directive::Cd(self.parse_word_expr()?),
            "cache" => Directive::Cache(self.parse_word_expr_list(&directive)?),
            "watch" => Directive::Watch(self.parse_word_expr_list(&directive)?),
            "confirm" => Directive::Confirm(self.parse_word_expr()?),
            "ignore" => Directive::Ignore,
            "shell" => Directive::Shell(self.expect_text("shell name")?),
            "needs" => Directive::Needs(self.parse_tool_needs()?),
            "require" => {
                let mut names = Vec::new();
                while self.peek_type() == TokenType::Identifier {
                    names.push(self.advance().value);
                }
                if names.is_empty() {
                    return Err(ParseException::with_token(
                        "expected variable names after @require",
                        self.current(),
                    ));
                }
                Directive::Require(names)
            }
            "export" => {
                let (name, value) = self.parse_export_args()?;
                Directive::Export { name, value }
            }
            "pre" => Directive::Pre(self.parse_hook_command()?),
            "post" => Directive::Post(self.parse_hook_command()?),
            other => {
                return Err(ParseException::with_token(
                    format!("unexpected directive `@{}` in recipe body", other),
                    &directive,
                ));
            }
        };

        self.expect(TokenType::Newline)?;
        Ok(parsed)
    }

    fn parse_if_directive(&mut self, opener: &Token) -> Result<Directive, ParseException> {
        let pos = Self::pos_of(opener);
        let mut branches = Vec::new();

        let mut condition = self.parse_condition()?;
        self.expect(TokenType::Newline)?;

        loop {
            let (body, stop) = self.parse_block_items(&["elif", "else", "end"])?;
            let stop = stop.ok_or_else(|| {
                ParseException::new(
                    format!("missing `@end` for `@if` opened at line {}", opener.line),
                    opener.line,
                    opener.column,
                )
            })?;
            branches.push(IfBranch { condition, body });

            match stop.as_str() {
                "elif" => {
                    condition = self.parse_condition()?;
                    self.expect(TokenType::Newline)?;
                }
                "else" => {
                    self.expect(TokenType::Newline)?;
                    let (else_body, stop) = self.parse_block_items(&["end"])?;
                    if stop.is_none() {
                        return Err(ParseException::new(
                            format!("missing `@end` for `@if` opened at line {}", opener.line),
                            opener.line,
                            opener.column,
                        ));
                    }
                    self.expect(TokenType::Newline)?;
                    return Ok(Directive::If(IfDirective {
                        branches,
                        else_body: Some(else_body),
                        pos,
                    }));
                }
                "end" => {
                    self.expect(TokenType::Newline)?;
                    return Ok(Directive::If(IfDirective {
                        branches,
                        else_body: None,
                        pos,
                    }));
                }
                _ => unreachable!("closer table mismatch"),
            }
        }
    }

    fn parse_each_directive(&mut self, opener: &Token) -> Result<Directive, ParseException> {
        let pos = Self::pos_of(opener);
        let items = self.parse_word_expr_list(opener)?;
        self.expect(TokenType::Newline)?;

        let (body, stop) = self.parse_block_items(&["end"])?;
        if stop.is_none() {
            return Err(ParseException::new(
                format!("missing `@end` for `@each` opened at line {}", opener.line),
                opener.line,
                opener.column,
            ));
        }
        self.expect(TokenType::Newline)?;

        Ok(Directive::Each { items, body, pos })
    }

    fn parse_condition(&mut self) -> Result<Condition, ParseException> {
        let lhs = self.parse_expression()?;
        let op = match self.peek_type() {
            TokenType::EqEq => Some(CompareOp::Eq),
            TokenType::NotEq => Some(CompareOp::Ne),
            TokenType::MatchOp => Some(CompareOp::Match),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let rhs = self.parse_expression()?;
                Ok(Condition::Compare { op, lhs, rhs })
            }
            None => Ok(Condition::Expr(lhs)),
        }
    }

    // -------------------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------------------

    /// Word-mode argument as an expression (bare words become literals).
    fn parse_word_expr(&mut self) -> Result<Expression, ParseException> {
        match self.peek_type() {
            TokenType::Str => {
                let token = self.advance();
                Ok(Expression::Literal {
                    value: token.value,
                    interpolate: !token.single_quoted,
                })
            }
            TokenType::Identifier | TokenType::Word | TokenType::Number => {
                Ok(Expression::literal(self.advance().value))
            }
            TokenType::ShellVar => Ok(Expression::ShellVar(self.advance().value)),
            TokenType::Backtick => Ok(Expression::Backtick(self.advance().value)),
            other => Err(ParseException::with_token(
                format!("expected word or string, found {}", other.as_str()),
                self.current(),
            )),
        }
    }

    fn parse_word_expr_list(&mut self, opener: &Token) -> Result<Vec<Expression>, ParseException> {
        let mut items = Vec::new();
        while !matches!(self.peek_type(), TokenType::Newline | TokenType::Eof) {
            items.push(self.parse_word_expr()?);
        }
        if items.is_empty() {
            return Err(ParseException::with_token(
                format!("`@{}` requires at least one argument", opener.value),
                opener,
            ));
        }
        Ok(items)
    }

    /// Expression: term (("+"|"/") term)*, left-associative.
    pub fn parse_expression(&mut self) -> Result<Expression, ParseException> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_type() {
                TokenType::Plus => {
                    self.advance();
                    let rhs = self.parse_primary()?;
                    expr = Expression::Concat(Box::new(expr), Box::new(rhs));
                }
                TokenType::Slash => {
                    self.advance();
                    let rhs = self.parse_primary()?;
                    expr = Expression::Join(Box::new(expr), Box::new(rhs));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseException> {
        match self.peek_type() {
            TokenType::Str => {
                let token = self.advance();
                Ok(Expression::Literal {
                    value: token.value,
                    interpolate: !token.single_quoted,
                })
            }
            TokenType::Number => Ok(Expression::raw_literal(self.advance().value)),
            TokenType::Word => Ok(Expression::literal(self.advance().value)),
            TokenType::ShellVar => Ok(Expression::ShellVar(self.advance().value)),
            TokenType::Backtick => Ok(Expression::Backtick(self.advance().value)),
            TokenType::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenType::RParen)?;
                Ok(expr)
            }
            TokenType::Identifier => {
                let name = self.advance();
                if self.peek_type() == TokenType::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if self.peek_type() != TokenType::RParen {
                        loop {
                            args.push(self.parse_expression()?);
                            if self.peek_type() == TokenType::Comma {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(TokenType::RParen)?;
                    Ok(Expression::Call {
                        name: name.value,
                        args,
                    })
                } else {
                    Ok(Expression::Variable(name.value))
                }
            }
            other => Err(ParseException::with_token(
                format!("expected expression, found {}", other.as_str()),
                self.current(),
            )),
        }
    }
}
