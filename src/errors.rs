//! Jake Error Types
//!
//! One error enum for the whole pipeline. Every variant maps to a stable
//! kind prefix (used verbatim in diagnostics and asserted by tests) and
//! to a process exit code:
//!
//! - 0: success
//! - 1: a recipe failed
//! - 2: recipe not found
//! - 3: Jakefile not found
//! - 4: parse error and every other precondition error

use std::path::PathBuf;

use thiserror::Error;

use crate::ast::Position;

#[derive(Debug, Error)]
pub enum JakeError {
    #[error("lex: {path}:{pos}: {message}")]
    Lex {
        path: PathBuf,
        pos: Position,
        message: String,
    },

    #[error("parse: {path}:{pos}: {message}")]
    Parse {
        path: PathBuf,
        pos: Position,
        message: String,
    },

    #[error("import-cycle: {}", format_chain(.chain))]
    ImportCycle { chain: Vec<PathBuf> },

    #[error("jakefile-not-found: {path}")]
    JakefileNotFound { path: PathBuf },

    #[error("unknown-recipe: no recipe named `{name}`{}", format_suggestion(.suggestion))]
    UnknownRecipe {
        name: String,
        suggestion: Option<String>,
    },

    #[error("unknown-variable: `{name}` is not defined")]
    UnknownVariable { name: String },

    #[error("unknown-function: `{name}` is not a builtin function")]
    UnknownFunction { name: String },

    #[error("arity: {message}")]
    Arity { message: String },

    #[error("dependency-cycle: {}", .members.join(" -> "))]
    DependencyCycle { members: Vec<String> },

    #[error("condition-type: {message}")]
    ConditionType { message: String },

    #[error("missing-tool: `{command}` not found on PATH{}", format_hint(.hint))]
    MissingTool {
        command: String,
        hint: Option<String>,
    },

    #[error("missing-env: required environment variable{} not set: {}", plural(.names), .names.join(", "))]
    MissingEnv { names: Vec<String> },

    #[error("confirm-declined: `{recipe}` aborted at confirmation prompt")]
    ConfirmDeclined { recipe: String },

    #[error("command-failed: `{command}` exited with code {code}")]
    CommandFailed { command: String, code: i32 },

    #[error("cache-io: {message}")]
    CacheIo { message: String },

    #[error("watch-io: {message}")]
    WatchIo { message: String },
}

impl JakeError {
    /// Stable kind prefix, the first `:`-delimited segment of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lex { .. } => "lex",
            Self::Parse { .. } => "parse",
            Self::ImportCycle { .. } => "import-cycle",
            Self::JakefileNotFound { .. } => "jakefile-not-found",
            Self::UnknownRecipe { .. } => "unknown-recipe",
            Self::UnknownVariable { .. } => "unknown-variable",
            Self::UnknownFunction { .. } => "unknown-function",
            Self::Arity { .. } => "arity",
            Self::DependencyCycle { .. } => "dependency-cycle",
            Self::ConditionType { .. } => "condition-type",
            Self::MissingTool { .. } => "missing-tool",
            Self::MissingEnv { .. } => "missing-env",
            Self::ConfirmDeclined { .. } => "confirm-declined",
            Self::CommandFailed { .. } => "command-failed",
            Self::CacheIo { .. } => "cache-io",
            Self::WatchIo { .. } => "watch-io",
        }
    }

    /// Process exit code for this error when it aborts the invocation.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CommandFailed { .. }
            | Self::ConfirmDeclined { .. }
            | Self::MissingTool { .. }
            | Self::MissingEnv { .. } => 1,
            Self::UnknownRecipe { .. } => 2,
            Self::JakefileNotFound { .. } => 3,
            _ => 4,
        }
    }

    /// True for failures of a single node rather than of the invocation:
    /// sibling branches keep executing when one of these occurs.
    pub fn is_node_scoped(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed { .. }
                | Self::ConfirmDeclined { .. }
                | Self::MissingTool { .. }
                | Self::MissingEnv { .. }
                | Self::UnknownVariable { .. }
                | Self::UnknownFunction { .. }
                | Self::Arity { .. }
                | Self::ConditionType { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, JakeError>;

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_suggestion(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean `{}`?)", s),
        None => String::new(),
    }
}

fn format_hint(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!(" ({})", h),
        None => String::new(),
    }
}

fn plural(names: &[String]) -> &'static str {
    if names.len() == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_prefixes_are_stable() {
        let err = JakeError::UnknownRecipe {
            name: "buidl".to_string(),
            suggestion: Some("build".to_string()),
        };
        assert_eq!(err.kind(), "unknown-recipe");
        assert!(err.to_string().starts_with("unknown-recipe:"));
        assert!(err.to_string().contains("did you mean `build`?"));
    }

    #[test]
    fn test_exit_codes() {
        let parse = JakeError::Parse {
            path: PathBuf::from("Jakefile"),
            pos: Position::new(3, 1),
            message: "expected header".to_string(),
        };
        assert_eq!(parse.exit_code(), 4);

        let missing = JakeError::JakefileNotFound {
            path: PathBuf::from("Jakefile"),
        };
        assert_eq!(missing.exit_code(), 3);

        let unknown = JakeError::UnknownRecipe {
            name: "x".to_string(),
            suggestion: None,
        };
        assert_eq!(unknown.exit_code(), 2);

        let failed = JakeError::CommandFailed {
            command: "false".to_string(),
            code: 1,
        };
        assert_eq!(failed.exit_code(), 1);

        let cycle = JakeError::DependencyCycle {
            members: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(cycle.exit_code(), 4);
    }

    #[test]
    fn test_node_scoped_classification() {
        assert!(JakeError::UnknownVariable {
            name: "x".to_string()
        }
        .is_node_scoped());
        assert!(!JakeError::ImportCycle { chain: vec![] }.is_node_scoped());
    }
}
