//! Command Runner
//!
//! Executes one resolved node: expands the recipe body's directives into
//! a linear command stream, applies the hook chain, and spawns one shell
//! subprocess per logical command.
//!
//! Directive expansion happens before any command is spawned, so the
//! `@needs`/`@require`/`@confirm` gates fire before the first command.
//! `{{…}}` interpolation is part of expansion; `$VAR` and backticks pass
//! through to the subprocess shell untouched.

use std::io::IsTerminal;
use std::io::Read;
use std::path::PathBuf;
use std::process::Stdio;

use crate::ast::{BodyItem, CommandLine, Directive, Recipe};
use crate::cache;
use crate::errors::{JakeError, Result};
use crate::eval::{functions, interpolate::interpolate, shell_command, EvalContext};
use crate::executor::{hooks, NodeOutcome, RunContext};
use crate::resolver::ExecNode;

/// One fully-expanded command, ready to spawn.
#[derive(Debug, Clone)]
pub struct PlannedCommand {
    pub text: String,
    pub quiet: bool,
    pub ignore_failure: bool,
    pub cwd: PathBuf,
    /// `@shell` override; `sh -c` (or `cmd /C`) otherwise
    pub shell: Option<String>,
    /// `@export`s accumulated up to this command
    pub env: Vec<(String, String)>,
}

/// Execute one node, hooks included. All failures are reported here and
/// folded into the returned outcome.
pub fn run_node(ctx: &RunContext, node: &ExecNode) -> NodeOutcome {
    match run_node_inner(ctx, node) {
        Ok(outcome) => outcome,
        Err(err) => {
            ctx.output.error(&format!("[{}] {}", node.recipe, err));
            fire_on_error(ctx, node);
            NodeOutcome::Failed(err)
        }
    }
}

fn run_node_inner(ctx: &RunContext, node: &ExecNode) -> Result<NodeOutcome> {
    let recipe = ctx
        .model
        .recipes
        .get(&node.recipe)
        .ok_or_else(|| JakeError::UnknownRecipe {
            name: node.recipe.clone(),
            suggestion: None,
        })?;

    // Platform filter: a non-matching recipe is skipped, not failed.
    if !recipe.attributes.platforms.is_empty()
        && !recipe.attributes.platforms.iter().any(|p| platform_matches(p))
    {
        ctx.output
            .note(&format!("{}: skipped (platform filter)", node.recipe));
        return Ok(NodeOutcome::Success);
    }

    let mut eval = node_eval_context(ctx, node, recipe);

    // Attribute-level tool gates. Install recipes injected by the
    // resolver have already run, so a second PATH probe decides.
    check_tool_needs(ctx, &recipe.attributes.needs)?;

    // Freshness: collect @cache inputs and skip when unchanged.
    let cached_files = expand_cache_patterns(ctx, &eval, recipe)?;
    if let Some(files) = &cached_files {
        match ctx
            .cache
            .lock()
            .unwrap()
            .is_stale(&ctx.model.root_dir, files)
        {
            Ok(false) => {
                ctx.output
                    .note(&format!("{}: unchanged, skipping", node.recipe));
                return Ok(NodeOutcome::CachedSkip);
            }
            Ok(true) => {}
            Err(err) => ctx.output.warn(&err.to_string()),
        }
    }

    let plan = Linearizer::expand(ctx, &mut eval, recipe)?;

    if ctx.flags.dry_run {
        for command in &plan.commands {
            ctx.output.note(&command.text);
        }
        return Ok(NodeOutcome::Success);
    }

    hooks::run_chain(ctx, &eval, &hooks::pre_chain(ctx.model, &node.recipe), &plan);
    hooks::run_chain(ctx, &eval, &plan.local_pre, &plan);

    let quiet_recipe = recipe.attributes.quiet;
    let recipe_ignores = recipe.ignores_failure();

    for command in &plan.commands {
        if ctx.cancel.is_cancelled() {
            return Ok(NodeOutcome::Cancelled);
        }
        let code = spawn_command(ctx, command, quiet_recipe)?;
        if ctx.cancel.is_cancelled() {
            return Ok(NodeOutcome::Cancelled);
        }
        if code != 0 {
            if command.ignore_failure || recipe_ignores {
                ctx.output.warn(&format!(
                    "[{}] `{}` exited with code {} (ignored)",
                    node.recipe, command.text, code
                ));
                continue;
            }
            return Err(JakeError::CommandFailed {
                command: command.text.clone(),
                code,
            });
        }
    }

    if let Some(files) = &cached_files {
        let mut store = ctx.cache.lock().unwrap();
        if let Err(err) = store.update(&ctx.model.root_dir, files) {
            ctx.output.warn(&err.to_string());
        }
    }

    hooks::run_chain(ctx, &eval, &plan.local_post, &plan);
    hooks::run_chain(ctx, &eval, &hooks::post_chain(ctx.model, &node.recipe), &plan);

    Ok(NodeOutcome::Success)
}

/// Evaluation scope for one node.
fn node_eval_context<'a>(
    ctx: &RunContext<'a>,
    node: &ExecNode,
    recipe: &Recipe,
) -> EvalContext<'a> {
    let mut eval = EvalContext::new(ctx.model, ctx.flags);
    eval.namespace = recipe.namespace.clone();
    eval.params = node.params.clone();
    eval.positional = node.positional.clone();
    eval.overrides = ctx.overrides.clone();
    eval
}

fn fire_on_error(ctx: &RunContext, node: &ExecNode) {
    if ctx.model.hooks.on_error.is_empty() {
        return;
    }
    let recipe = match ctx.model.recipes.get(&node.recipe) {
        Some(recipe) => recipe,
        None => return,
    };
    let eval = node_eval_context(ctx, node, recipe);
    let plan = ExpandedBody::empty(ctx.model.root_dir.clone());
    hooks::run_chain(ctx, &eval, &ctx.model.hooks.on_error, &plan);
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

fn check_tool_needs(ctx: &RunContext, needs: &[crate::ast::ToolNeed]) -> Result<()> {
    if ctx.flags.dry_run {
        return Ok(());
    }
    let path_var = ctx.model.env.get("PATH").map(String::as_str);
    for need in needs {
        if functions::find_command(&need.command, path_var).is_none() {
            return Err(JakeError::MissingTool {
                command: need.command.clone(),
                hint: need.hint.clone(),
            });
        }
    }
    Ok(())
}

/// Evaluate and expand the recipe's `@cache` patterns. `None` when the
/// recipe declares no cache inputs; an empty expansion warns *glob-empty*
/// and disables the skip.
fn expand_cache_patterns(
    ctx: &RunContext,
    eval: &EvalContext,
    recipe: &Recipe,
) -> Result<Option<Vec<PathBuf>>> {
    let patterns = recipe.cache_patterns();
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut values = Vec::new();
    for pattern in patterns {
        values.push(eval.eval(pattern)?);
    }
    let files = cache::expand_globs(&ctx.model.root_dir, &values)?;
    if files.is_empty() {
        ctx.output.warn(&format!(
            "glob-empty: `{}` matched no files; `{}` will always run",
            values.join(" "),
            recipe.qualified_name()
        ));
        return Ok(None);
    }
    Ok(Some(files))
}

/// The expanded body of one node.
pub struct ExpandedBody {
    pub commands: Vec<PlannedCommand>,
    pub local_pre: Vec<CommandLine>,
    pub local_post: Vec<CommandLine>,
    /// Working directory for hook commands
    pub hook_cwd: PathBuf,
    /// Final `@export` set, also applied to hook commands
    pub exports: Vec<(String, String)>,
}

impl ExpandedBody {
    fn empty(hook_cwd: PathBuf) -> Self {
        Self {
            commands: Vec::new(),
            local_pre: Vec::new(),
            local_post: Vec::new(),
            hook_cwd,
            exports: Vec::new(),
        }
    }
}

/// Walks the body, evaluating directives into a linear command stream.
/// `@cd` and `@shell` are block-scoped; `@export` persists for the rest
/// of the recipe.
struct Linearizer<'r, 'a, 'm> {
    ctx: &'r RunContext<'m>,
    eval: &'r mut EvalContext<'a>,
    recipe_name: String,
    cwd: PathBuf,
    shell: Option<String>,
    exports: Vec<(String, String)>,
    out: ExpandedBody,
}

impl<'r, 'a, 'm> Linearizer<'r, 'a, 'm> {
    fn expand(
        ctx: &'r RunContext<'m>,
        eval: &'r mut EvalContext<'a>,
        recipe: &Recipe,
    ) -> Result<ExpandedBody> {
        let cwd = ctx.model.root_dir.clone();
        // Child environment layers: file-scope `@export`s, then parameter
        // bindings as `$name`, then recipe-local `@export`s as they appear.
        let mut exports: Vec<(String, String)> = Vec::new();
        for (name, value) in &ctx.model.exported_env {
            let resolved = match value {
                Some(expr) => eval.eval(expr)?,
                None => eval
                    .lookup(name)?
                    .or_else(|| ctx.model.env.get(name).cloned())
                    .unwrap_or_default(),
            };
            exports.push((name.clone(), resolved));
        }
        exports.extend(eval.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut linearizer = Linearizer {
            ctx,
            eval,
            recipe_name: recipe.qualified_name(),
            cwd: cwd.clone(),
            shell: None,
            exports,
            out: ExpandedBody::empty(cwd),
        };
        linearizer.walk(&recipe.body)?;
        let mut out = linearizer.out;
        out.exports = linearizer.exports;
        Ok(out)
    }

    fn walk(&mut self, items: &[BodyItem]) -> Result<()> {
        for item in items {
            match item {
                BodyItem::Command(line) => {
                    let text = interpolate(self.eval, &line.text)?;
                    self.out.commands.push(PlannedCommand {
                        text,
                        quiet: line.quiet,
                        ignore_failure: line.ignore_failure,
                        cwd: self.cwd.clone(),
                        shell: self.shell.clone(),
                        env: self.exports.clone(),
                    });
                }
                BodyItem::Directive(directive) => self.walk_directive(directive)?,
            }
        }
        Ok(())
    }

    fn walk_directive(&mut self, directive: &Directive) -> Result<()> {
        match directive {
            Directive::If(ifd) => {
                for branch in &ifd.branches {
                    if self.eval.eval_condition(&branch.condition)? {
                        return self.walk_scoped(&branch.body);
                    }
                }
                if let Some(else_body) = &ifd.else_body {
                    return self.walk_scoped(else_body);
                }
                Ok(())
            }
            Directive::Each { items, body, .. } => {
                let saved_item = self.eval.each_item.clone();
                for item in items {
                    let value = self.eval.eval(item)?;
                    self.eval.each_item = Some(value);
                    self.walk_scoped(body)?;
                }
                self.eval.each_item = saved_item;
                Ok(())
            }
            Directive::Cd(expr) => {
                let dir = self.eval.eval(expr)?;
                let path = PathBuf::from(&dir);
                self.cwd = if path.is_absolute() {
                    path
                } else {
                    self.cwd.join(path)
                };
                Ok(())
            }
            Directive::Shell(name) => {
                self.shell = Some(name.clone());
                Ok(())
            }
            Directive::Confirm(message) => {
                if self.ctx.flags.dry_run {
                    return Ok(());
                }
                let prompt = self.eval.eval(message)?;
                self.confirm(&prompt)
            }
            Directive::Needs(needs) => check_tool_needs(self.ctx, needs),
            Directive::Require(names) => {
                if self.ctx.flags.dry_run {
                    return Ok(());
                }
                let missing: Vec<String> = names
                    .iter()
                    .filter(|name| {
                        self.ctx
                            .model
                            .env
                            .get(*name)
                            .map(|v| v.is_empty())
                            .unwrap_or(true)
                    })
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(JakeError::MissingEnv { names: missing })
                }
            }
            Directive::Export { name, value } => {
                let resolved = match value {
                    Some(expr) => self.eval.eval(expr)?,
                    None => self
                        .eval
                        .lookup(name)?
                        .or_else(|| self.ctx.model.env.get(name).cloned())
                        .unwrap_or_default(),
                };
                self.exports.push((name.clone(), resolved.clone()));
                self.eval.locals.insert(name.clone(), resolved);
                Ok(())
            }
            Directive::Pre(command) => {
                self.out.local_pre.push(command.clone());
                Ok(())
            }
            Directive::Post(command) => {
                self.out.local_post.push(command.clone());
                Ok(())
            }
            // Declarations consumed elsewhere: @cache by the freshness
            // check, @watch by the watcher, @ignore by failure handling.
            Directive::Cache(_) | Directive::Watch(_) | Directive::Ignore => Ok(()),
        }
    }

    /// Walk a nested block with `@cd`/`@shell` restored on exit.
    fn walk_scoped(&mut self, items: &[BodyItem]) -> Result<()> {
        let saved_cwd = self.cwd.clone();
        let saved_shell = self.shell.clone();
        let result = self.walk(items);
        self.cwd = saved_cwd;
        self.shell = saved_shell;
        result
    }

    fn confirm(&self, prompt: &str) -> Result<()> {
        if self.ctx.auto_yes {
            return Ok(());
        }
        let declined_err = || JakeError::ConfirmDeclined {
            recipe: self.recipe_name.clone(),
        };
        if !std::io::stdin().is_terminal() {
            return Err(declined_err());
        }
        let accepted = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false);
        if accepted {
            Ok(())
        } else {
            Err(declined_err())
        }
    }
}

/// Spawn one planned command and wait for it. Returns the exit code.
pub(crate) fn spawn_command(
    ctx: &RunContext,
    planned: &PlannedCommand,
    quiet_recipe: bool,
) -> Result<i32> {
    let echo = ctx.flags.verbose || (!planned.quiet && !quiet_recipe);
    if echo {
        ctx.output.echo(&planned.text);
    }

    let mut command = match &planned.shell {
        Some(shell) => {
            let mut c = std::process::Command::new(shell);
            c.arg("-c").arg(&planned.text);
            c
        }
        None => shell_command(&planned.text),
    };
    command
        .current_dir(&planned.cwd)
        .env_clear()
        .envs(&ctx.model.env)
        .envs(planned.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    if ctx.output.capture {
        command.stdout(Stdio::piped());
    } else {
        command.stdout(Stdio::inherit());
    }
    command.stderr(Stdio::inherit());

    let mut child = command.spawn().map_err(|err| JakeError::CommandFailed {
        command: format!("{} ({})", planned.text, err),
        code: 127,
    })?;
    let pid = child.id();
    ctx.cancel.register_child(pid);

    if let Some(mut stdout) = child.stdout.take() {
        let mut captured = String::new();
        let _ = stdout.read_to_string(&mut captured);
        ctx.output.append(&captured);
    }

    let status = child.wait();
    ctx.cancel.unregister_child(pid);

    let status = status.map_err(|err| JakeError::CommandFailed {
        command: format!("{} ({})", planned.text, err),
        code: 127,
    })?;
    Ok(status.code().unwrap_or(-1))
}
