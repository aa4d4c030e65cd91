//! Builtin Function Registry
//!
//! The closed set of functions callable from expressions and conditions.
//! String functions return their value; predicate functions return the
//! strings "true"/"false" and double as the condition subset.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::ast::Expression;
use crate::errors::{JakeError, Result};
use crate::eval::EvalContext;

lazy_static::lazy_static! {
    /// `shell_config()` dispatch table on the basename of `$SHELL`.
    static ref SHELL_CONFIG_PATHS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("bash", ".bashrc");
        m.insert("zsh", ".zshrc");
        m.insert("fish", ".config/fish/config.fish");
        m.insert("sh", ".profile");
        m.insert("ksh", ".kshrc");
        m.insert("csh", ".cshrc");
        m.insert("tcsh", ".tcshrc");
        m
    };

    /// Every builtin name, for unknown-function reporting.
    static ref BUILTIN_NAMES: Vec<&'static str> = vec![
        "uppercase", "lowercase", "trim",
        "dirname", "basename", "extension", "without_extension",
        "without_extensions", "absolute_path", "abs_path",
        "home", "local_bin", "shell_config",
        "env", "exists", "eq", "neq",
        "is_watching", "is_dry_run", "is_verbose",
        "is_platform", "is_macos", "is_linux", "is_windows", "is_unix",
        "command", "item",
    ];

    /// Functions permitted in `@if`/`@elif` conditions.
    static ref CONDITION_FUNCTIONS: Vec<&'static str> = vec![
        "env", "exists", "eq", "neq", "command",
        "is_watching", "is_dry_run", "is_verbose",
        "is_platform", "is_macos", "is_linux", "is_windows", "is_unix",
    ];
}

/// Evaluate a builtin call to its string value.
pub fn call(ctx: &EvalContext, name: &str, args: &[Expression]) -> Result<String> {
    if !BUILTIN_NAMES.contains(&name) {
        return Err(JakeError::UnknownFunction {
            name: name.to_string(),
        });
    }

    let values: Vec<String> = args
        .iter()
        .map(|arg| ctx.eval(arg))
        .collect::<Result<_>>()?;

    match name {
        "uppercase" => Ok(arity1(name, &values)?.to_uppercase()),
        "lowercase" => Ok(arity1(name, &values)?.to_lowercase()),
        "trim" => Ok(arity1(name, &values)?.trim().to_string()),

        "dirname" => {
            let path = arity1(name, &values)?;
            let parent = Path::new(&path).parent();
            Ok(match parent {
                Some(p) if !p.as_os_str().is_empty() => p.display().to_string(),
                _ => ".".to_string(),
            })
        }
        "basename" => {
            let path = arity1(name, &values)?;
            Ok(Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone()))
        }
        "extension" => {
            let path = arity1(name, &values)?;
            Ok(Path::new(&path)
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default())
        }
        "without_extension" => {
            let path = arity1(name, &values)?;
            Ok(Path::new(&path).with_extension("").display().to_string())
        }
        "without_extensions" => {
            let path = arity1(name, &values)?;
            let p = Path::new(&path);
            let stem = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stem = stem.split('.').next().unwrap_or("").to_string();
            Ok(match p.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => {
                    parent.join(stem).display().to_string()
                }
                _ => stem,
            })
        }
        "absolute_path" | "abs_path" => {
            let path = arity1(name, &values)?;
            let joined = if Path::new(&path).is_absolute() {
                PathBuf::from(&path)
            } else {
                ctx.cwd.join(&path)
            };
            Ok(normalize_lexically(&joined).display().to_string())
        }

        "home" => home_dir(ctx),
        "local_bin" => Ok(format!("{}/.local/bin", home_dir(ctx)?)),
        "shell_config" => shell_config(ctx, &values),

        "env" => {
            arity_range(name, &values, 1, 2)?;
            match ctx.model.env.get(&values[0]) {
                Some(value) => Ok(value.clone()),
                None => match values.get(1) {
                    Some(default) => Ok(default.clone()),
                    None => Err(JakeError::MissingEnv {
                        names: vec![values[0].clone()],
                    }),
                },
            }
        }
        "exists" => {
            let path = arity1(name, &values)?;
            Ok(bool_str(ctx.cwd.join(path).exists()))
        }
        "eq" => {
            arity_range(name, &values, 2, 2)?;
            Ok(bool_str(values[0] == values[1]))
        }
        "neq" => {
            arity_range(name, &values, 2, 2)?;
            Ok(bool_str(values[0] != values[1]))
        }

        "is_watching" => Ok(bool_str(ctx.flags.watching)),
        "is_dry_run" => Ok(bool_str(ctx.flags.dry_run)),
        "is_verbose" => Ok(bool_str(ctx.flags.verbose)),

        "is_platform" => {
            let platform = arity1(name, &values)?;
            Ok(bool_str(platform_matches(&platform)))
        }
        "is_macos" => Ok(bool_str(cfg!(target_os = "macos"))),
        "is_linux" => Ok(bool_str(cfg!(target_os = "linux"))),
        "is_windows" => Ok(bool_str(cfg!(windows))),
        "is_unix" => Ok(bool_str(cfg!(unix))),

        "command" => {
            let command = arity1(name, &values)?;
            Ok(find_command(&command, ctx.model.env.get("PATH").map(String::as_str))
                .map(|p| p.display().to_string())
                .unwrap_or_default())
        }
        "item" => {
            arity_range(name, &values, 0, 0)?;
            ctx.each_item
                .clone()
                .ok_or_else(|| JakeError::UnknownVariable {
                    name: "item".to_string(),
                })
        }

        _ => unreachable!("builtin table mismatch"),
    }
}

/// Evaluate a call appearing as an `@if`/`@elif` condition.
pub fn call_condition(ctx: &EvalContext, name: &str, args: &[Expression]) -> Result<bool> {
    if !BUILTIN_NAMES.contains(&name) {
        return Err(JakeError::UnknownFunction {
            name: name.to_string(),
        });
    }
    if !CONDITION_FUNCTIONS.contains(&name) {
        return Err(JakeError::ConditionType {
            message: format!("`{}()` cannot be used as a condition", name),
        });
    }

    match name {
        // env(NAME) as a condition: set and non-empty (a default, when
        // present, substitutes before the emptiness check)
        "env" => {
            let values: Vec<String> = args
                .iter()
                .map(|arg| ctx.eval(arg))
                .collect::<Result<_>>()?;
            arity_range(name, &values, 1, 2)?;
            let value = ctx
                .model
                .env
                .get(&values[0])
                .cloned()
                .or_else(|| values.get(1).cloned());
            Ok(value.map(|v| !v.is_empty()).unwrap_or(false))
        }
        "command" => Ok(!call(ctx, name, args)?.is_empty()),
        _ => Ok(call(ctx, name, args)? == "true"),
    }
}

/// Check whether a tool is on PATH (or an absolute/relative path exists).
pub fn find_command(name: &str, path_var: Option<&str>) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return if is_executable(&path) { Some(path) } else { None };
    }
    for dir in path_var.unwrap_or_default().split(':') {
        if dir.is_empty() {
            continue;
        }
        let candidate = Path::new(dir).join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn home_dir(ctx: &EvalContext) -> Result<String> {
    ctx.model
        .env
        .get("HOME")
        .cloned()
        .ok_or_else(|| JakeError::MissingEnv {
            names: vec!["HOME".to_string()],
        })
}

fn shell_config(ctx: &EvalContext, values: &[String]) -> Result<String> {
    arity_range("shell_config", values, 0, 0)?;
    let shell = ctx
        .model
        .env
        .get("SHELL")
        .cloned()
        .ok_or_else(|| JakeError::MissingEnv {
            names: vec!["SHELL".to_string()],
        })?;
    let base = Path::new(&shell)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(shell.clone());
    match SHELL_CONFIG_PATHS.get(base.as_str()) {
        Some(suffix) => Ok(format!("{}/{}", home_dir(ctx)?, suffix)),
        None => Err(JakeError::MissingTool {
            command: base,
            hint: Some("shell_config() does not know this shell's config file".to_string()),
        }),
    }
}

fn platform_matches(name: &str) -> bool {
    match name {
        "macos" | "osx" | "darwin" => cfg!(target_os = "macos"),
        "linux" => cfg!(target_os = "linux"),
        "windows" => cfg!(windows),
        "unix" => cfg!(unix),
        _ => false,
    }
}

fn bool_str(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

/// Normalize a path lexically: resolve `.` and `..` without touching the
/// filesystem, so paths that do not exist yet still normalize.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn arity1<'v>(name: &str, values: &'v [String]) -> Result<&'v String> {
    arity_range(name, values, 1, 1)?;
    Ok(&values[0])
}

fn arity_range(name: &str, values: &[String], min: usize, max: usize) -> Result<()> {
    if values.len() < min || values.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(JakeError::Arity {
            message: format!(
                "{}() expects {} argument(s), got {}",
                name,
                expected,
                values.len()
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::tests::empty_model;
    use crate::eval::RunFlags;

    fn ctx_with<'a>(model: &'a crate::loader::Jakefile) -> EvalContext<'a> {
        EvalContext::new(model, RunFlags::default())
    }

    fn call_str(ctx: &EvalContext, name: &str, args: &[&str]) -> Result<String> {
        let exprs: Vec<Expression> = args.iter().map(|a| Expression::raw_literal(*a)).collect();
        call(ctx, name, &exprs)
    }

    #[test]
    fn test_string_functions() {
        let model = empty_model();
        let ctx = ctx_with(&model);
        assert_eq!(call_str(&ctx, "uppercase", &["abc"]).unwrap(), "ABC");
        assert_eq!(call_str(&ctx, "lowercase", &["ABC"]).unwrap(), "abc");
        assert_eq!(call_str(&ctx, "trim", &["  x  "]).unwrap(), "x");
    }

    #[test]
    fn test_path_functions() {
        let model = empty_model();
        let ctx = ctx_with(&model);
        assert_eq!(call_str(&ctx, "dirname", &["a/b/c.txt"]).unwrap(), "a/b");
        assert_eq!(call_str(&ctx, "dirname", &["file"]).unwrap(), ".");
        assert_eq!(call_str(&ctx, "basename", &["a/b/c.txt"]).unwrap(), "c.txt");
        assert_eq!(call_str(&ctx, "extension", &["a/b.tar.gz"]).unwrap(), "gz");
        assert_eq!(call_str(&ctx, "extension", &["plain"]).unwrap(), "");
        assert_eq!(
            call_str(&ctx, "without_extension", &["a/b.tar.gz"]).unwrap(),
            "a/b.tar"
        );
        assert_eq!(
            call_str(&ctx, "without_extensions", &["a/b.tar.gz"]).unwrap(),
            "a/b"
        );
    }

    #[test]
    fn test_absolute_path_normalizes() {
        let model = empty_model();
        let mut ctx = ctx_with(&model);
        ctx.cwd = PathBuf::from("/work/project");
        assert_eq!(
            call_str(&ctx, "absolute_path", &["../other/./x"]).unwrap(),
            "/work/other/x"
        );
        assert_eq!(
            call_str(&ctx, "abs_path", &["/already/abs"]).unwrap(),
            "/already/abs"
        );
    }

    #[test]
    fn test_env_with_default() {
        let mut model = empty_model();
        model.env.insert("SET_VAR".to_string(), "value".to_string());
        model.env.remove("UNSET_VAR");
        let ctx = ctx_with(&model);
        assert_eq!(call_str(&ctx, "env", &["SET_VAR"]).unwrap(), "value");
        assert_eq!(
            call_str(&ctx, "env", &["UNSET_VAR", "fallback"]).unwrap(),
            "fallback"
        );
        let err = call_str(&ctx, "env", &["UNSET_VAR"]).unwrap_err();
        assert_eq!(err.kind(), "missing-env");
    }

    #[test]
    fn test_eq_neq() {
        let model = empty_model();
        let ctx = ctx_with(&model);
        assert_eq!(call_str(&ctx, "eq", &["a", "a"]).unwrap(), "true");
        assert_eq!(call_str(&ctx, "neq", &["a", "b"]).unwrap(), "true");
        assert_eq!(call_str(&ctx, "eq", &["a", "b"]).unwrap(), "false");
    }

    #[test]
    fn test_shell_config_table() {
        let mut model = empty_model();
        model.env.insert("SHELL".to_string(), "/bin/zsh".to_string());
        model.env.insert("HOME".to_string(), "/home/u".to_string());
        let ctx = ctx_with(&model);
        assert_eq!(call_str(&ctx, "shell_config", &[]).unwrap(), "/home/u/.zshrc");

        model.env.insert("SHELL".to_string(), "/usr/bin/fish".to_string());
        let ctx = ctx_with(&model);
        assert_eq!(
            call_str(&ctx, "shell_config", &[]).unwrap(),
            "/home/u/.config/fish/config.fish"
        );

        model.env.insert("SHELL".to_string(), "/opt/weirdsh".to_string());
        let ctx = ctx_with(&model);
        assert!(call_str(&ctx, "shell_config", &[]).is_err());
    }

    #[test]
    fn test_unknown_function() {
        let model = empty_model();
        let ctx = ctx_with(&model);
        let err = call_str(&ctx, "frobnicate", &["x"]).unwrap_err();
        assert_eq!(err.kind(), "unknown-function");
    }

    #[test]
    fn test_arity_error() {
        let model = empty_model();
        let ctx = ctx_with(&model);
        let err = call_str(&ctx, "uppercase", &["a", "b"]).unwrap_err();
        assert_eq!(err.kind(), "arity");
    }

    #[test]
    fn test_item_outside_each_is_error() {
        let model = empty_model();
        let ctx = ctx_with(&model);
        assert!(call_str(&ctx, "item", &[]).is_err());

        let mut ctx = ctx_with(&model);
        ctx.each_item = Some("current".to_string());
        assert_eq!(call_str(&ctx, "item", &[]).unwrap(), "current");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_lookup() {
        let mut model = empty_model();
        model
            .env
            .insert("PATH".to_string(), "/bin:/usr/bin".to_string());
        let ctx = ctx_with(&model);
        assert!(!call_str(&ctx, "command", &["sh"]).unwrap().is_empty());
        assert!(call_str(&ctx, "command", &["definitely-not-a-tool-xyz"])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_condition_subset_enforced() {
        let model = empty_model();
        let ctx = ctx_with(&model);
        let args = [Expression::raw_literal("x")];
        let err = call_condition(&ctx, "uppercase", &args).unwrap_err();
        assert_eq!(err.kind(), "condition-type");
    }

    #[test]
    fn test_is_unix_condition() {
        let model = empty_model();
        let ctx = ctx_with(&model);
        assert_eq!(call_condition(&ctx, "is_unix", &[]).unwrap(), cfg!(unix));
    }
}
