//! Hook Dispatcher
//!
//! Runs global and targeted hook commands around each node:
//!
//!   global `@pre` → `@before <name>` → recipe-local `@pre` → body →
//!   recipe-local `@post` → `@after <name>` → global `@post`
//!
//! `@on_error` fires in place of the post hooks when the node fails.
//! Hook command failures are reported but never stop later hooks.

use crate::ast::CommandLine;
use crate::eval::{interpolate::interpolate, EvalContext};
use crate::executor::runner::{spawn_command, ExpandedBody, PlannedCommand};
use crate::executor::RunContext;
use crate::loader::Jakefile;

/// Hooks that run before a node's body: global `@pre`, then every
/// `@before` targeting this recipe, in declaration order.
pub fn pre_chain(model: &Jakefile, qualified: &str) -> Vec<CommandLine> {
    let mut chain = model.hooks.pre.clone();
    if let Some(before) = model.hooks.before.get(qualified) {
        chain.extend(before.iter().cloned());
    }
    chain
}

/// Hooks that run after a successful body: every `@after` targeting this
/// recipe, then global `@post`.
pub fn post_chain(model: &Jakefile, qualified: &str) -> Vec<CommandLine> {
    let mut chain = Vec::new();
    if let Some(after) = model.hooks.after.get(qualified) {
        chain.extend(after.iter().cloned());
    }
    chain.extend(model.hooks.post.iter().cloned());
    chain
}

/// Run a hook chain. Failures are reported and the chain continues.
pub fn run_chain(
    ctx: &RunContext,
    eval: &EvalContext,
    commands: &[CommandLine],
    plan: &ExpandedBody,
) {
    for command in commands {
        let text = match interpolate(eval, &command.text) {
            Ok(text) => text,
            Err(err) => {
                ctx.output.warn(&format!("hook `{}`: {}", command.text, err));
                continue;
            }
        };
        let planned = PlannedCommand {
            text,
            quiet: true,
            ignore_failure: true,
            cwd: plan.hook_cwd.clone(),
            shell: None,
            env: plan.exports.clone(),
        };
        match spawn_command(ctx, &planned, true) {
            Ok(0) => {}
            Ok(code) => ctx
                .output
                .warn(&format!("hook `{}` exited with code {}", planned.text, code)),
            Err(err) => ctx.output.warn(&format!("hook `{}`: {}", planned.text, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Position;
    use crate::eval::RunFlags;
    use crate::loader;
    use std::fs;
    use tempfile::TempDir;

    fn hook(text: &str) -> CommandLine {
        CommandLine {
            text: text.to_string(),
            quiet: false,
            ignore_failure: false,
            pos: Position::new(1, 1),
        }
    }

    fn model_from(content: &str) -> (Jakefile, TempDir) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Jakefile");
        fs::write(&path, content).unwrap();
        (loader::load(&path).unwrap(), dir)
    }

    #[test]
    fn test_pre_chain_order() {
        let (model, _dir) = model_from(
            "@pre echo GLOBAL\n@before build echo TARGETED\ntask build:\n    echo b\n",
        );
        let chain = pre_chain(&model, "build");
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].text, "echo GLOBAL");
        assert_eq!(chain[1].text, "echo TARGETED");
    }

    #[test]
    fn test_post_chain_order() {
        let (model, _dir) = model_from(
            "@post echo GLOBAL\n@after build echo TARGETED\ntask build:\n    echo b\n",
        );
        let chain = post_chain(&model, "build");
        assert_eq!(chain[0].text, "echo TARGETED");
        assert_eq!(chain[1].text, "echo GLOBAL");
    }

    #[test]
    fn test_untargeted_recipe_gets_only_globals() {
        let (model, _dir) = model_from(
            "@pre echo GLOBAL\n@before build echo TARGETED\ntask other:\n    echo o\n",
        );
        let chain = pre_chain(&model, "other");
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].text, "echo GLOBAL");
    }

    #[cfg(unix)]
    #[test]
    fn test_hook_failure_does_not_stop_chain() {
        let (model, _dir) = model_from("task t:\n    echo x\n");
        let mut ctx = RunContext::new(&model, RunFlags::default());
        ctx.output = crate::executor::OutputSink::captured();
        let eval = EvalContext::new(&model, RunFlags::default());
        let plan = ExpandedBody {
            commands: Vec::new(),
            local_pre: Vec::new(),
            local_post: Vec::new(),
            hook_cwd: model.root_dir.clone(),
            exports: Vec::new(),
        };
        run_chain(
            &ctx,
            &eval,
            &[hook("exit 9"), hook("echo still-here")],
            &plan,
        );
        assert_eq!(ctx.output.take(), "still-here\n");
    }
}
