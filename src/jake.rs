//! Jake Facade
//!
//! Main entry point tying the pipeline together:
//! load → link → resolve → schedule → run, plus the watch loop.
//!
//! The CLI in `main.rs` is a thin shell over this type; tests drive it
//! directly with captured output.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::errors::{JakeError, Result};
use crate::eval::RunFlags;
use crate::executor::{scheduler, OutputSink, RunContext};
use crate::loader::{self, Jakefile};
use crate::resolver;
use crate::watcher::{self, Watcher, KILL_GRACE, POLL_INTERVAL};

/// Options for creating a Jake environment.
#[derive(Debug, Clone, Default)]
pub struct JakeOptions {
    /// Explicit Jakefile path (`-f` / `JAKE_FILE`)
    pub jakefile: Option<PathBuf>,
    pub verbose: bool,
    pub dry_run: bool,
    /// `--yes`: auto-accept confirmation prompts
    pub yes: bool,
    /// `None` = serial; `Some(n)` = parallel worker pool
    pub jobs: Option<usize>,
    pub watch: bool,
    /// Extra watch pattern from `-w PATTERN`
    pub watch_pattern: Option<String>,
    /// Capture child stdout instead of inheriting the terminal
    pub capture: bool,
}

/// Result of one invocation.
#[derive(Debug)]
pub struct RunOutcome {
    pub exit_code: i32,
    /// Child stdout when `capture` was set, empty otherwise
    pub captured: String,
}

/// The Jake environment: one loaded model plus invocation options.
#[derive(Debug)]
pub struct Jake {
    model: Jakefile,
    options: JakeOptions,
}

impl Jake {
    /// Locate, parse, and link the Jakefile; verify `@env_required`.
    pub fn load(options: JakeOptions) -> Result<Self> {
        let path = find_jakefile(options.jakefile.clone())?;
        let model = loader::load(&path)?;

        let missing: Vec<String> = model
            .required_env
            .iter()
            .filter(|name| {
                model
                    .env
                    .get(*name)
                    .map(|v| v.is_empty())
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(JakeError::MissingEnv { names: missing });
        }

        Ok(Self { model, options })
    }

    pub fn model(&self) -> &Jakefile {
        &self.model
    }

    /// Run a recipe (or the default) with CLI arguments. `name=value`
    /// arguments bind as variable overrides, the rest positionally.
    pub fn run(&self, recipe: Option<&str>, args: &[String]) -> Result<RunOutcome> {
        let (overrides, positional) = split_arguments(args);

        let name = match recipe {
            Some(name) => name.to_string(),
            None => self
                .model
                .default_recipe()
                .map(str::to_string)
                .ok_or_else(|| JakeError::UnknownRecipe {
                    name: "(default)".to_string(),
                    suggestion: None,
                })?,
        };

        if self.options.watch {
            self.run_watch(&name, &positional, &overrides)
        } else {
            self.run_once(&self.model, &name, &positional, &overrides)
        }
    }

    fn flags(&self) -> RunFlags {
        RunFlags {
            watching: self.options.watch,
            dry_run: self.options.dry_run,
            verbose: self.options.verbose,
        }
    }

    fn jobs(&self) -> usize {
        self.options.jobs.unwrap_or(1).max(1)
    }

    fn run_once(
        &self,
        model: &Jakefile,
        name: &str,
        positional: &[String],
        overrides: &HashMap<String, String>,
    ) -> Result<RunOutcome> {
        let flags = self.flags();
        let graph = resolver::resolve(model, flags, overrides, name, positional)?;

        let mut ctx = RunContext::new(model, flags);
        ctx.overrides = overrides.clone();
        ctx.auto_yes = self.options.yes;
        ctx.jobs = self.jobs();
        if self.options.capture {
            ctx.output = OutputSink::captured();
        }

        let report = scheduler::execute(&ctx, &graph);
        if let Err(err) = ctx.cache.lock().unwrap().persist() {
            ctx.output.warn(&err.to_string());
        }

        Ok(RunOutcome {
            exit_code: if report.failed { 1 } else { 0 },
            captured: ctx.output.take(),
        })
    }

    /// Watch loop: re-resolve and re-run from a fresh model on every
    /// change; cancel in-flight execution when a change arrives while
    /// running. Runs until the process is interrupted.
    fn run_watch(
        &self,
        name: &str,
        positional: &[String],
        overrides: &HashMap<String, String>,
    ) -> Result<RunOutcome> {
        let mut first_pass = true;

        loop {
            // Fresh model each iteration so Jakefile edits take effect
            let model = match loader::load(&self.model.path) {
                Ok(model) => model,
                Err(err) if !first_pass => {
                    eprintln!("{}", err);
                    self.wait_for_jakefile_change()?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            let flags = self.flags();
            let graph = match resolver::resolve(&model, flags, overrides, name, positional) {
                Ok(graph) => graph,
                Err(err) if !first_pass => {
                    eprintln!("{}", err);
                    self.wait_for_jakefile_change()?;
                    continue;
                }
                Err(err) => return Err(err),
            };
            first_pass = false;

            let mut patterns = watcher::collect_patterns(&model, &graph, flags, overrides);
            if let Some(extra) = &self.options.watch_pattern {
                if !patterns.contains(extra) {
                    patterns.push(extra.clone());
                }
            }
            let mut watch = Watcher::new(model.root_dir.clone(), patterns)?;

            let mut ctx = RunContext::new(&model, flags);
            ctx.overrides = overrides.clone();
            ctx.auto_yes = self.options.yes;
            ctx.jobs = self.jobs();

            let interrupted = std::thread::scope(|scope| -> Result<bool> {
                let handle = scope.spawn(|| scheduler::execute(&ctx, &graph));
                let interrupted = loop {
                    if handle.is_finished() {
                        break false;
                    }
                    if watch.poll_changed()? {
                        ctx.cancel.cancel();
                        ctx.cancel.terminate_children(KILL_GRACE);
                        break true;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                };
                let _ = handle.join();
                Ok(interrupted)
            })?;

            if let Err(err) = ctx.cache.lock().unwrap().persist() {
                ctx.output.warn(&err.to_string());
            }

            if interrupted {
                watch.debounce()?;
                continue;
            }

            // Execution finished; block until the next change
            loop {
                std::thread::sleep(POLL_INTERVAL);
                if watch.poll_changed()? {
                    break;
                }
            }
            watch.debounce()?;
        }
    }

    fn wait_for_jakefile_change(&self) -> Result<()> {
        let mut watch = Watcher::new(
            self.model.root_dir.clone(),
            vec![self.model.path.display().to_string()],
        )?;
        loop {
            std::thread::sleep(POLL_INTERVAL);
            if watch.poll_changed()? {
                return Ok(());
            }
        }
    }
}

/// Partition CLI arguments into `name=value` overrides and positionals.
pub fn split_arguments(args: &[String]) -> (HashMap<String, String>, Vec<String>) {
    let mut overrides = HashMap::new();
    let mut positional = Vec::new();
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) if crate::parser::lexer::is_valid_identifier(name) => {
                overrides.insert(name.to_string(), value.to_string());
            }
            _ => positional.push(arg.clone()),
        }
    }
    (overrides, positional)
}

/// Locate the Jakefile: explicit path, `JAKE_FILE`, then conventional
/// names in the current directory.
pub fn find_jakefile(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        return Err(JakeError::JakefileNotFound { path });
    }
    if let Ok(from_env) = std::env::var("JAKE_FILE") {
        let path = PathBuf::from(from_env);
        if path.exists() {
            return Ok(path);
        }
        return Err(JakeError::JakefileNotFound { path });
    }
    for name in ["Jakefile", "jakefile", "Jakefile.jake"] {
        let path = PathBuf::from(name);
        if path.exists() {
            return Ok(path);
        }
    }
    Err(JakeError::JakefileNotFound {
        path: PathBuf::from("Jakefile"),
    })
}
