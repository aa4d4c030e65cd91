//! Jakefile Loading and Import Linking
//!
//! Resolves the `@import` graph into one linked model:
//! - paths resolve relative to the importing file
//! - `as ns` prefixes every recipe, variable, and targeted hook
//! - the same physical file imported twice under one namespace is a no-op;
//!   two namespaces produce two distinct qualified copies
//! - cycles are detected on the active import stack and reported with the
//!   full path chain
//!
//! Collisions (recipe, variable, alias) within one namespace are fatal;
//! across namespaces names coexist.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::ast::{
    CommandLine, Expression, GlobalDirective, Item, Recipe, SourceFile,
};
use crate::errors::{JakeError, Result};
use crate::parser::{self, ParseErrorKind, ParseException};

/// Global hook registry of the linked model.
///
/// Multiple `@before`/`@after` hooks for one recipe run in declaration
/// order, imports linked first-to-last.
#[derive(Debug, Clone, Default)]
pub struct Hooks {
    pub pre: Vec<CommandLine>,
    pub post: Vec<CommandLine>,
    pub on_error: Vec<CommandLine>,
    pub before: HashMap<String, Vec<CommandLine>>,
    pub after: HashMap<String, Vec<CommandLine>>,
}

/// The linked model: every imported file merged, names qualified.
#[derive(Debug, Clone)]
pub struct Jakefile {
    /// Root Jakefile path
    pub path: PathBuf,
    /// Directory of the root Jakefile; default working directory for
    /// commands and base for glob expansion
    pub root_dir: PathBuf,
    /// Qualified variable name → expression, in declaration order
    pub variables: IndexMap<String, Expression>,
    /// Qualified recipe name → recipe, in declaration order
    pub recipes: IndexMap<String, Recipe>,
    /// Qualified alias → qualified recipe name
    pub aliases: HashMap<String, String>,
    pub hooks: Hooks,
    pub dotenv_paths: Vec<PathBuf>,
    pub required_env: Vec<String>,
    /// File-scope `@export`s, in declaration order
    pub exported_env: Vec<(String, Option<Expression>)>,
    /// Process env + dotenv snapshot, immutable after load
    pub env: HashMap<String, String>,
}

impl Jakefile {
    /// The `@default` recipe, or the first declared, or none.
    pub fn default_recipe(&self) -> Option<&str> {
        self.recipes
            .iter()
            .find(|(_, r)| r.attributes.is_default)
            .or_else(|| self.recipes.iter().next())
            .map(|(name, _)| name.as_str())
    }

    /// Resolve a reference to a qualified recipe name: namespace-local
    /// first, then global; aliases resolve at both steps.
    pub fn resolve_name(&self, from_namespace: Option<&str>, reference: &str) -> Option<String> {
        if let Some(ns) = from_namespace {
            let local = format!("{}.{}", ns, reference);
            if self.recipes.contains_key(&local) {
                return Some(local);
            }
            if let Some(target) = self.aliases.get(&local) {
                return Some(target.clone());
            }
        }
        if self.recipes.contains_key(reference) {
            return Some(reference.to_string());
        }
        if let Some(target) = self.aliases.get(reference) {
            return Some(target.clone());
        }
        None
    }
}

/// Load and link a Jakefile and its imports.
pub fn load(path: &Path) -> Result<Jakefile> {
    let root = path
        .canonicalize()
        .map_err(|_| JakeError::JakefileNotFound {
            path: path.to_path_buf(),
        })?;
    let root_dir = root
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut loader = Loader {
        model: Jakefile {
            path: root.clone(),
            root_dir,
            variables: IndexMap::new(),
            recipes: IndexMap::new(),
            aliases: HashMap::new(),
            hooks: Hooks::default(),
            dotenv_paths: Vec::new(),
            required_env: Vec::new(),
            exported_env: Vec::new(),
            env: HashMap::new(),
        },
        visited: HashSet::new(),
        stack: Vec::new(),
    };
    loader.load_file(&root, "")?;

    let mut model = loader.model;
    model.env = build_env_snapshot(&model.dotenv_paths)?;
    Ok(model)
}

struct Loader {
    model: Jakefile,
    /// (canonical path, namespace prefix) pairs already linked
    visited: HashSet<(PathBuf, String)>,
    /// Active import chain for cycle detection
    stack: Vec<PathBuf>,
}

impl Loader {
    fn load_file(&mut self, path: &Path, prefix: &str) -> Result<()> {
        let canonical = path
            .canonicalize()
            .map_err(|_| JakeError::JakefileNotFound {
                path: path.to_path_buf(),
            })?;

        if self.stack.contains(&canonical) {
            let mut chain = self.stack.clone();
            chain.push(canonical);
            return Err(JakeError::ImportCycle { chain });
        }
        if !self
            .visited
            .insert((canonical.clone(), prefix.to_string()))
        {
            // Same file under the same namespace: no-op
            return Ok(());
        }

        let source_text =
            std::fs::read_to_string(&canonical).map_err(|err| JakeError::Parse {
                path: canonical.clone(),
                pos: crate::ast::Position::new(1, 1),
                message: format!("cannot read file: {}", err),
            })?;
        let source = parser::parse(&source_text)
            .map_err(|err| parse_exception_to_error(err, &canonical))?;

        self.stack.push(canonical.clone());
        let result = self.link_items(source, &canonical, prefix);
        self.stack.pop();
        result
    }

    fn link_items(&mut self, source: SourceFile, file: &Path, prefix: &str) -> Result<()> {
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();

        for item in source.items {
            match item {
                Item::Assignment(assignment) => {
                    let qualified = qualify(prefix, &assignment.name);
                    if self.model.variables.contains_key(&qualified) {
                        return Err(JakeError::Parse {
                            path: file.to_path_buf(),
                            pos: assignment.pos,
                            message: format!("duplicate variable `{}`", qualified),
                        });
                    }
                    self.model.variables.insert(qualified, assignment.value);
                }
                Item::Import(import) => {
                    let target = dir.join(&import.path);
                    if !target.exists() {
                        return Err(JakeError::Parse {
                            path: file.to_path_buf(),
                            pos: import.pos,
                            message: format!("imported file not found: {}", import.path),
                        });
                    }
                    let child_prefix = match &import.namespace {
                        Some(ns) => qualify(prefix, ns),
                        None => prefix.to_string(),
                    };
                    self.load_file(&target, &child_prefix)?;
                }
                Item::Global(global) => self.link_global(global, file, prefix)?,
                Item::Recipe(mut recipe) => {
                    if !prefix.is_empty() {
                        recipe.namespace = Some(prefix.to_string());
                    }
                    let qualified = recipe.qualified_name();
                    if self.model.recipes.contains_key(&qualified) {
                        return Err(JakeError::Parse {
                            path: file.to_path_buf(),
                            pos: recipe.pos,
                            message: format!("duplicate recipe `{}`", qualified),
                        });
                    }
                    for alias in &recipe.attributes.aliases {
                        let qualified_alias = qualify(prefix, alias);
                        if self.model.aliases.contains_key(&qualified_alias)
                            || self.model.recipes.contains_key(&qualified_alias)
                        {
                            return Err(JakeError::Parse {
                                path: file.to_path_buf(),
                                pos: recipe.pos,
                                message: format!("duplicate alias `{}`", qualified_alias),
                            });
                        }
                        self.model
                            .aliases
                            .insert(qualified_alias, qualified.clone());
                    }
                    self.model.recipes.insert(qualified, recipe);
                }
            }
        }
        Ok(())
    }

    fn link_global(
        &mut self,
        global: GlobalDirective,
        file: &Path,
        prefix: &str,
    ) -> Result<()> {
        match global {
            GlobalDirective::Pre(cmd) => self.model.hooks.pre.push(cmd),
            GlobalDirective::Post(cmd) => self.model.hooks.post.push(cmd),
            GlobalDirective::OnError(cmd) => self.model.hooks.on_error.push(cmd),
            GlobalDirective::Before { recipe, command } => {
                self.model
                    .hooks
                    .before
                    .entry(qualify(prefix, &recipe))
                    .or_default()
                    .push(command);
            }
            GlobalDirective::After { recipe, command } => {
                self.model
                    .hooks
                    .after
                    .entry(qualify(prefix, &recipe))
                    .or_default()
                    .push(command);
            }
            GlobalDirective::Dotenv { path, .. } => {
                let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
                self.model.dotenv_paths.push(dir.join(path));
            }
            GlobalDirective::EnvRequired { names, .. } => {
                self.model.required_env.extend(names);
            }
            GlobalDirective::Export { name, value, .. } => {
                self.model.exported_env.push((name, value));
            }
        }
        Ok(())
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn parse_exception_to_error(err: ParseException, path: &Path) -> JakeError {
    let pos = crate::ast::Position::new(err.line, err.column);
    match err.kind {
        ParseErrorKind::Lex => JakeError::Lex {
            path: path.to_path_buf(),
            pos,
            message: err.message,
        },
        ParseErrorKind::Parse => JakeError::Parse {
            path: path.to_path_buf(),
            pos,
            message: err.message,
        },
    }
}

/// Build the environment snapshot: process env plus dotenv files.
/// Dotenv values never override variables already present.
fn build_env_snapshot(dotenv_paths: &[PathBuf]) -> Result<HashMap<String, String>> {
    let mut env: HashMap<String, String> = std::env::vars().collect();

    for path in dotenv_paths {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                return Err(JakeError::Parse {
                    path: path.clone(),
                    pos: crate::ast::Position::new(1, 1),
                    message: format!("cannot read dotenv file: {}", err),
                });
            }
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().trim_start_matches("export ").trim();
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                    .unwrap_or(value);
                env.entry(key.to_string()).or_insert_with(|| value.to_string());
            }
        }
    }

    Ok(env)
}
