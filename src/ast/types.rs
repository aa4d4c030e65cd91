//! Abstract Syntax Tree (AST) Types for Jakefiles
//!
//! This module defines the complete AST structure for Jakefile source.
//! The design follows the Jakefile grammar while being Rust-idiomatic:
//! tagged enums for items, body items, directives, and expressions, so
//! every consumer gets exhaustive matching for free.
//!
//! The AST is immutable after parsing. Positions are preserved on the
//! nodes that produce user-visible diagnostics.

use std::fmt;

// =============================================================================
// BASE TYPES
// =============================================================================

/// Position information for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// =============================================================================
// SOURCE FILE & ITEMS
// =============================================================================

/// Root node: one parsed Jakefile (before import linking).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceFile {
    pub items: Vec<Item>,
}

/// Top-level items in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Assignment(Assignment),
    Import(Import),
    Global(GlobalDirective),
    Recipe(Recipe),
}

/// `name = expr` or `name := expr`
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub value: Expression,
    pub pos: Position,
}

/// `@import "path" [as namespace]`
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: String,
    pub namespace: Option<String>,
    pub pos: Position,
}

/// File-scoped directives that are not part of any recipe.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalDirective {
    /// `@pre <command>`: runs before every executed node
    Pre(CommandLine),
    /// `@post <command>`: runs after every successful node
    Post(CommandLine),
    /// `@on_error <command>`: runs once per failing node
    OnError(CommandLine),
    /// `@before <recipe> <command>`
    Before { recipe: String, command: CommandLine },
    /// `@after <recipe> <command>`
    After { recipe: String, command: CommandLine },
    /// `@dotenv "path"`
    Dotenv { path: String, pos: Position },
    /// `@env_required VAR...`
    EnvRequired { names: Vec<String>, pos: Position },
    /// `@export NAME[=expr]` at file scope
    Export {
        name: String,
        value: Option<Expression>,
        pos: Position,
    },
}

// =============================================================================
// RECIPES
// =============================================================================

/// `task` or `file`. A file recipe name is an output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
    Task,
    File,
}

impl fmt::Display for RecipeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => write!(f, "task"),
            Self::File => write!(f, "file"),
        }
    }
}

/// Variadic binding kind for the final parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variadic {
    #[default]
    None,
    /// `+name`: one or more
    OneOrMore,
    /// `*name`: zero or more
    ZeroOrMore,
}

/// One recipe parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub default: Option<Expression>,
    pub variadic: Variadic,
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variadic {
            Variadic::OneOrMore => write!(f, "+{}", self.name)?,
            Variadic::ZeroOrMore => write!(f, "*{}", self.name)?,
            Variadic::None => write!(f, "{}", self.name)?,
        }
        if self.default.is_some() {
            write!(f, "=…")?;
        }
        Ok(())
    }
}

/// A tool requirement from `@needs cmd ["hint"] [-> install_recipe]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolNeed {
    pub command: String,
    pub hint: Option<String>,
    pub install_recipe: Option<String>,
}

/// Attributes collected from the directives preceding a recipe header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecipeAttributes {
    pub group: Option<String>,
    pub desc: Option<String>,
    pub aliases: Vec<String>,
    pub quiet: bool,
    /// From `@only`/`@only-os`/`@platform`: empty means all platforms
    pub platforms: Vec<String>,
    pub needs: Vec<ToolNeed>,
    pub is_default: bool,
}

/// A named unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub kind: RecipeKind,
    pub name: String,
    /// Attached by the loader when the recipe arrives via `@import … as ns`
    pub namespace: Option<String>,
    pub parameters: Vec<Parameter>,
    /// Dependency references as written (qualification happens at link time)
    pub dependencies: Vec<String>,
    pub attributes: RecipeAttributes,
    pub body: Vec<BodyItem>,
    pub pos: Position,
}

impl Recipe {
    /// `namespace.name` when namespaced, plain name otherwise.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}.{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    /// Patterns declared by `@cache` directives in the body, in order.
    pub fn cache_patterns(&self) -> Vec<&Expression> {
        let mut out = Vec::new();
        collect_patterns(&self.body, &mut out, PatternKind::Cache);
        out
    }

    /// Patterns declared by `@watch` directives in the body, in order.
    pub fn watch_patterns(&self) -> Vec<&Expression> {
        let mut out = Vec::new();
        collect_patterns(&self.body, &mut out, PatternKind::Watch);
        out
    }

    /// True when an `@ignore` directive appears anywhere in the body.
    pub fn ignores_failure(&self) -> bool {
        fn walk(items: &[BodyItem]) -> bool {
            items.iter().any(|item| match item {
                BodyItem::Directive(Directive::Ignore) => true,
                BodyItem::Directive(Directive::If(ifd)) => {
                    ifd.branches.iter().any(|b| walk(&b.body))
                        || ifd.else_body.as_deref().map(walk).unwrap_or(false)
                }
                BodyItem::Directive(Directive::Each { body, .. }) => walk(body),
                _ => false,
            })
        }
        walk(&self.body)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum PatternKind {
    Cache,
    Watch,
}

fn collect_patterns<'a>(items: &'a [BodyItem], out: &mut Vec<&'a Expression>, kind: PatternKind) {
    for item in items {
        match item {
            BodyItem::Directive(Directive::Cache(patterns)) if kind == PatternKind::Cache => {
                out.extend(patterns.iter());
            }
            BodyItem::Directive(Directive::Watch(patterns)) if kind == PatternKind::Watch => {
                out.extend(patterns.iter());
            }
            BodyItem::Directive(Directive::If(ifd)) => {
                for branch in &ifd.branches {
                    collect_patterns(&branch.body, out, kind);
                }
                if let Some(else_body) = &ifd.else_body {
                    collect_patterns(else_body, out, kind);
                }
            }
            BodyItem::Directive(Directive::Each { body, .. }) => {
                collect_patterns(body, out, kind);
            }
            _ => {}
        }
    }
}

// =============================================================================
// RECIPE BODIES
// =============================================================================

/// A raw command line from a recipe body or a hook.
///
/// `text` is the source text after prefix stripping; `{{…}}` markers are
/// expanded at execution time, `$VAR` and backticks pass through to the
/// subprocess shell untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub text: String,
    /// `@` prefix: do not echo the command
    pub quiet: bool,
    /// `-` prefix: non-zero exit is non-fatal
    pub ignore_failure: bool,
    pub pos: Position,
}

/// One entry of a recipe body, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyItem {
    Command(CommandLine),
    Directive(Directive),
}

/// Body directives.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    If(IfDirective),
    Each {
        items: Vec<Expression>,
        body: Vec<BodyItem>,
        pos: Position,
    },
    Cd(Expression),
    Cache(Vec<Expression>),
    Watch(Vec<Expression>),
    Confirm(Expression),
    Ignore,
    Shell(String),
    Needs(Vec<ToolNeed>),
    Require(Vec<String>),
    Export {
        name: String,
        value: Option<Expression>,
    },
    /// Recipe-local `@pre`
    Pre(CommandLine),
    /// Recipe-local `@post`
    Post(CommandLine),
}

/// `@if cond … @elif cond … @else … @end`
#[derive(Debug, Clone, PartialEq)]
pub struct IfDirective {
    pub branches: Vec<IfBranch>,
    pub else_body: Option<Vec<BodyItem>>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub condition: Condition,
    pub body: Vec<BodyItem>,
}

/// A condition as written in `@if`/`@elif`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// A condition-function call or a bare identifier
    Expr(Expression),
    /// Infix comparison: `a == b`, `a != b`, `a =~ pattern`
    Compare {
        op: CompareOp,
        lhs: Expression,
        rhs: Expression,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Match,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
            Self::Match => write!(f, "=~"),
        }
    }
}

// =============================================================================
// EXPRESSIONS
// =============================================================================

/// Expression AST used by assignments, parameter defaults, directive
/// arguments, and `{{…}}` interpolation bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// String literal. `interpolate` is false for single-quoted strings,
    /// whose `{{…}}` content stays verbatim.
    Literal { value: String, interpolate: bool },
    /// Identifier reference, resolved through the scope chain
    Variable(String),
    /// Builtin function call
    Call { name: String, args: Vec<Expression> },
    /// `a + b` string concatenation
    Concat(Box<Expression>, Box<Expression>),
    /// `a / b` path join
    Join(Box<Expression>, Box<Expression>),
    /// `$VAR`, `${VAR}`, `$1`, `$@`, resolved at evaluation time
    ShellVar(String),
    /// `` `command` ``: stdout of the command, trailing newline trimmed
    Backtick(String),
}

impl Expression {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            interpolate: true,
        }
    }

    pub fn raw_literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            interpolate: false,
        }
    }
}
