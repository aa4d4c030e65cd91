//! Expression Evaluation
//!
//! Evaluates expression ASTs against the scope chain:
//! parameter bindings, then recipe-local `@export`/`@require` values,
//! then CLI `name=value` overrides, then global assignments (namespace-
//! local before plain), and only through `env(NAME)` the process
//! environment snapshot.
//!
//! Conditions are a closed subset: condition-function calls, bare
//! identifiers (truthy iff set and non-empty), and `==`/`!=`/`=~`
//! comparisons. Anything else is a *condition-type* error.

pub mod functions;
pub mod interpolate;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::ast::{CompareOp, Condition, Expression};
use crate::errors::{JakeError, Result};
use crate::loader::Jakefile;

/// Invocation-mode flags surfaced to `is_watching()`/`is_dry_run()`/
/// `is_verbose()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunFlags {
    pub watching: bool,
    pub dry_run: bool,
    pub verbose: bool,
}

/// One evaluation scope, built per execution node.
pub struct EvalContext<'a> {
    pub model: &'a Jakefile,
    /// Namespace of the recipe being evaluated
    pub namespace: Option<String>,
    /// Parameter bindings, highest precedence
    pub params: IndexMap<String, String>,
    /// Positional values for `$1`…`$9` and `$@`
    pub positional: Vec<String>,
    /// Recipe-local `@export` values
    pub locals: HashMap<String, String>,
    /// CLI `name=value` overrides
    pub overrides: HashMap<String, String>,
    pub flags: RunFlags,
    /// Innermost `@each` item
    pub each_item: Option<String>,
    /// Working directory for backticks and path functions
    pub cwd: PathBuf,
    /// Guard against cyclic variable references
    visiting: RefCell<Vec<String>>,
}

impl<'a> EvalContext<'a> {
    pub fn new(model: &'a Jakefile, flags: RunFlags) -> Self {
        Self {
            model,
            namespace: None,
            params: IndexMap::new(),
            positional: Vec::new(),
            locals: HashMap::new(),
            overrides: HashMap::new(),
            flags,
            each_item: None,
            cwd: model.root_dir.clone(),
            visiting: RefCell::new(Vec::new()),
        }
    }

    /// Resolve an identifier through the scope chain. Does not consult the
    /// process environment: that path is only reachable via `env(NAME)`.
    pub fn lookup(&self, name: &str) -> Result<Option<String>> {
        if name == "item" {
            return Ok(self.each_item.clone());
        }
        if let Some(value) = self.params.get(name) {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = self.locals.get(name) {
            return Ok(Some(value.clone()));
        }
        if let Some(value) = self.overrides.get(name) {
            return Ok(Some(value.clone()));
        }

        let mut candidates = Vec::new();
        if let Some(ns) = &self.namespace {
            candidates.push(format!("{}.{}", ns, name));
        }
        candidates.push(name.to_string());

        for qualified in candidates {
            if let Some(expr) = self.model.variables.get(&qualified) {
                {
                    let mut visiting = self.visiting.borrow_mut();
                    if visiting.contains(&qualified) {
                        return Err(JakeError::UnknownVariable {
                            name: format!("{} (cyclic reference)", qualified),
                        });
                    }
                    visiting.push(qualified.clone());
                }
                let result = self.eval(expr);
                self.visiting.borrow_mut().pop();
                return result.map(Some);
            }
        }
        Ok(None)
    }

    /// Evaluate an expression to its string value.
    pub fn eval(&self, expr: &Expression) -> Result<String> {
        match expr {
            Expression::Literal { value, interpolate } => {
                if *interpolate {
                    interpolate::interpolate(self, value)
                } else {
                    Ok(value.clone())
                }
            }
            Expression::Variable(name) => match self.lookup(name)? {
                Some(value) => Ok(value),
                None => Err(JakeError::UnknownVariable { name: name.clone() }),
            },
            Expression::Call { name, args } => functions::call(self, name, args),
            Expression::Concat(lhs, rhs) => {
                Ok(format!("{}{}", self.eval(lhs)?, self.eval(rhs)?))
            }
            Expression::Join(lhs, rhs) => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                if left.is_empty() {
                    Ok(right)
                } else if left.ends_with('/') {
                    Ok(format!("{}{}", left, right))
                } else {
                    Ok(format!("{}/{}", left, right))
                }
            }
            Expression::ShellVar(name) => self.eval_shell_var(name),
            Expression::Backtick(command) => self.run_backtick(command),
        }
    }

    fn eval_shell_var(&self, name: &str) -> Result<String> {
        if name == "@" {
            return Ok(self.positional.join(" "));
        }
        if let Ok(index) = name.parse::<usize>() {
            return match index
                .checked_sub(1)
                .and_then(|i| self.positional.get(i))
            {
                Some(value) => Ok(value.clone()),
                None => Err(JakeError::UnknownVariable {
                    name: format!("${}", index),
                }),
            };
        }
        if let Some(value) = self.lookup(name)? {
            return Ok(value);
        }
        if let Some(value) = self.model.env.get(name) {
            return Ok(value.clone());
        }
        Err(JakeError::UnknownVariable {
            name: format!("${}", name),
        })
    }

    /// Evaluate an `@if`/`@elif` condition.
    pub fn eval_condition(&self, condition: &Condition) -> Result<bool> {
        match condition {
            Condition::Compare { op, lhs, rhs } => {
                let left = self.eval(lhs)?;
                let right = self.eval(rhs)?;
                match op {
                    CompareOp::Eq => Ok(left == right),
                    CompareOp::Ne => Ok(left != right),
                    CompareOp::Match => {
                        let pattern = regex_lite::Regex::new(&right).map_err(|err| {
                            JakeError::ConditionType {
                                message: format!("invalid pattern `{}`: {}", right, err),
                            }
                        })?;
                        Ok(pattern.is_match(&left))
                    }
                }
            }
            Condition::Expr(Expression::Variable(name)) => {
                Ok(self.lookup(name)?.map(|v| !v.is_empty()).unwrap_or(false))
            }
            Condition::Expr(Expression::Call { name, args }) => {
                functions::call_condition(self, name, args)
            }
            Condition::Expr(other) => Err(JakeError::ConditionType {
                message: format!(
                    "expected a condition function, identifier, or comparison, found `{:?}`",
                    other
                ),
            }),
        }
    }

    /// Run a backtick command and capture trimmed stdout.
    fn run_backtick(&self, command: &str) -> Result<String> {
        let output = shell_command(command)
            .current_dir(&self.cwd)
            .envs(&self.model.env)
            .output()
            .map_err(|err| JakeError::CommandFailed {
                command: command.to_string(),
                code: err.raw_os_error().unwrap_or(-1),
            })?;
        if !output.status.success() {
            return Err(JakeError::CommandFailed {
                command: command.to_string(),
                code: output.status.code().unwrap_or(-1),
            });
        }
        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        while stdout.ends_with('\n') || stdout.ends_with('\r') {
            stdout.pop();
        }
        Ok(stdout)
    }
}

/// A `sh -c` (or `cmd /C` on Windows) command builder.
pub fn shell_command(text: &str) -> std::process::Command {
    #[cfg(unix)]
    {
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg(text);
        cmd
    }
    #[cfg(windows)]
    {
        let mut cmd = std::process::Command::new("cmd");
        cmd.arg("/C").arg(text);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Hooks;

    pub(crate) fn empty_model() -> Jakefile {
        Jakefile {
            path: PathBuf::from("Jakefile"),
            root_dir: std::env::temp_dir(),
            variables: IndexMap::new(),
            recipes: IndexMap::new(),
            aliases: HashMap::new(),
            hooks: Hooks::default(),
            dotenv_paths: Vec::new(),
            required_env: Vec::new(),
            exported_env: Vec::new(),
            env: std::env::vars().collect(),
        }
    }

    #[test]
    fn test_scope_precedence() {
        let mut model = empty_model();
        model
            .variables
            .insert("name".to_string(), Expression::literal("global"));
        let mut ctx = EvalContext::new(&model, RunFlags::default());
        assert_eq!(ctx.lookup("name").unwrap().as_deref(), Some("global"));

        ctx.overrides
            .insert("name".to_string(), "override".to_string());
        assert_eq!(ctx.lookup("name").unwrap().as_deref(), Some("override"));

        ctx.params.insert("name".to_string(), "param".to_string());
        assert_eq!(ctx.lookup("name").unwrap().as_deref(), Some("param"));
    }

    #[test]
    fn test_namespace_local_variable_wins() {
        let mut model = empty_model();
        model
            .variables
            .insert("lib.greeting".to_string(), Expression::literal("from lib"));
        model
            .variables
            .insert("greeting".to_string(), Expression::literal("from root"));
        let mut ctx = EvalContext::new(&model, RunFlags::default());
        ctx.namespace = Some("lib".to_string());
        assert_eq!(ctx.lookup("greeting").unwrap().as_deref(), Some("from lib"));
    }

    #[test]
    fn test_variable_chain_evaluates() {
        let mut model = empty_model();
        model
            .variables
            .insert("a".to_string(), Expression::literal("{{b}}!"));
        model
            .variables
            .insert("b".to_string(), Expression::literal("value"));
        let ctx = EvalContext::new(&model, RunFlags::default());
        assert_eq!(ctx.lookup("a").unwrap().as_deref(), Some("value!"));
    }

    #[test]
    fn test_cyclic_variable_reference_is_error() {
        let mut model = empty_model();
        model
            .variables
            .insert("a".to_string(), Expression::Variable("b".to_string()));
        model
            .variables
            .insert("b".to_string(), Expression::Variable("a".to_string()));
        let ctx = EvalContext::new(&model, RunFlags::default());
        let err = ctx.lookup("a").unwrap_err();
        assert_eq!(err.kind(), "unknown-variable");
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_concat_and_join() {
        let model = empty_model();
        let ctx = EvalContext::new(&model, RunFlags::default());
        let expr = Expression::Join(
            Box::new(Expression::literal("root")),
            Box::new(Expression::literal("bin")),
        );
        assert_eq!(ctx.eval(&expr).unwrap(), "root/bin");

        let expr = Expression::Concat(
            Box::new(Expression::literal("a")),
            Box::new(Expression::literal("b")),
        );
        assert_eq!(ctx.eval(&expr).unwrap(), "ab");
    }

    #[test]
    fn test_positional_shell_vars() {
        let model = empty_model();
        let mut ctx = EvalContext::new(&model, RunFlags::default());
        ctx.positional = vec!["one".to_string(), "two".to_string()];
        assert_eq!(ctx.eval(&Expression::ShellVar("1".to_string())).unwrap(), "one");
        assert_eq!(
            ctx.eval(&Expression::ShellVar("@".to_string())).unwrap(),
            "one two"
        );
        let err = ctx.eval(&Expression::ShellVar("3".to_string())).unwrap_err();
        assert_eq!(err.kind(), "unknown-variable");
    }

    #[test]
    fn test_condition_bare_identifier() {
        let mut model = empty_model();
        model
            .variables
            .insert("set_var".to_string(), Expression::literal("yes"));
        model
            .variables
            .insert("empty_var".to_string(), Expression::literal(""));
        let ctx = EvalContext::new(&model, RunFlags::default());

        let cond = Condition::Expr(Expression::Variable("set_var".to_string()));
        assert!(ctx.eval_condition(&cond).unwrap());
        let cond = Condition::Expr(Expression::Variable("empty_var".to_string()));
        assert!(!ctx.eval_condition(&cond).unwrap());
        let cond = Condition::Expr(Expression::Variable("missing".to_string()));
        assert!(!ctx.eval_condition(&cond).unwrap());
    }

    #[test]
    fn test_condition_comparison() {
        let model = empty_model();
        let ctx = EvalContext::new(&model, RunFlags::default());
        let cond = Condition::Compare {
            op: CompareOp::Eq,
            lhs: Expression::literal("a"),
            rhs: Expression::literal("a"),
        };
        assert!(ctx.eval_condition(&cond).unwrap());

        let cond = Condition::Compare {
            op: CompareOp::Match,
            lhs: Expression::literal("release-1.2"),
            rhs: Expression::literal("^release-"),
        };
        assert!(ctx.eval_condition(&cond).unwrap());
    }

    #[test]
    fn test_condition_type_error_for_plain_string() {
        let model = empty_model();
        let ctx = EvalContext::new(&model, RunFlags::default());
        let cond = Condition::Expr(Expression::literal("hello"));
        assert_eq!(ctx.eval_condition(&cond).unwrap_err().kind(), "condition-type");
    }

    #[cfg(unix)]
    #[test]
    fn test_backtick_captures_stdout() {
        let model = empty_model();
        let ctx = EvalContext::new(&model, RunFlags::default());
        let out = ctx
            .eval(&Expression::Backtick("echo hello".to_string()))
            .unwrap();
        assert_eq!(out, "hello");
    }
}
