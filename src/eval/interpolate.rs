//! `{{…}}` Interpolation
//!
//! Expands interpolation markers in strings and command text at execution
//! time. Everything outside the markers passes through untouched; in
//! particular `$VAR` and backticks, which belong to the subprocess shell.

use crate::errors::{JakeError, Result};
use crate::eval::EvalContext;
use crate::parser;

/// Expand every `{{expr}}` marker in `text`.
pub fn interpolate(ctx: &EvalContext, text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| JakeError::Parse {
            path: ctx.model.path.clone(),
            pos: crate::ast::Position::new(0, 0),
            message: format!("unterminated `{{{{` in `{}`", text),
        })?;
        let inner = &after[..end];

        let expr = parser::parse_expression_str(inner).map_err(|err| JakeError::Parse {
            path: ctx.model.path.clone(),
            pos: crate::ast::Position::new(err.line, err.column),
            message: format!("in `{{{{{}}}}}`: {}", inner, err.message),
        })?;
        out.push_str(&ctx.eval(&expr)?);

        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
