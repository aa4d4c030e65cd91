//! Dependency Resolution
//!
//! Turns a requested recipe plus arguments into an execution DAG:
//! - nodes live in a `petgraph` `DiGraph` (compact integer indices);
//!   an edge `dependency -> dependent` means the dependency must finish
//!   before the dependent starts
//! - resolution is memoised on `(qualified name, bound arguments)`;
//!   dependencies carry no argument passing and resolve with defaults
//! - cycle detection uses DFS colouring on the active resolution stack;
//!   revisiting a grey recipe reports the full cycle by name
//! - a missing tool declared via `@needs cmd -> install_recipe` injects
//!   the install recipe as an implicit dependency, deduplicated against
//!   the declared dependency list
//!
//! Unknown recipes come back with a nearest-name suggestion using
//! case-insensitive Levenshtein distance.

use std::collections::HashMap;

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::ast::{BodyItem, Directive, Recipe, ToolNeed, Variadic};
use crate::errors::{JakeError, Result};
use crate::eval::{functions, EvalContext, RunFlags};
use crate::loader::Jakefile;

/// Maximum Levenshtein distance for a "did you mean" suggestion.
const SUGGESTION_THRESHOLD: usize = 3;

/// One node of the execution DAG.
#[derive(Debug, Clone)]
pub struct ExecNode {
    /// Qualified recipe name
    pub recipe: String,
    /// Bound parameter values, in parameter order
    pub params: IndexMap<String, String>,
    /// Raw positional values (for `$1`…/`$@`)
    pub positional: Vec<String>,
}

/// The resolved DAG. The root is the requested recipe's node; its
/// dependencies are upstream along incoming edges.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    graph: DiGraph<ExecNode, ()>,
    root: NodeIndex,
}

impl ExecutionGraph {
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn node(&self, index: usize) -> &ExecNode {
        &self.graph[NodeIndex::new(index)]
    }

    pub fn root_index(&self) -> usize {
        self.root.index()
    }

    pub fn root_node(&self) -> &ExecNode {
        &self.graph[self.root]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ExecNode> + '_ {
        self.graph.node_weights()
    }

    /// Predecessors: nodes that must finish before this one starts, in
    /// declaration order. (petgraph walks neighbors newest-edge-first,
    /// so the collected list is reversed.)
    pub fn dependencies(&self, index: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(index), Direction::Incoming)
            .map(NodeIndex::index)
            .collect();
        deps.reverse();
        deps
    }

    /// Successors: nodes waiting on this one, in declaration order.
    pub fn dependents(&self, index: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            .map(NodeIndex::index)
            .collect();
        out.reverse();
        out
    }

    /// Deterministic topological order: dependencies first, siblings in
    /// source order. Produced by a post-order DFS from the root.
    pub fn topo_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.node_count());
        let mut visited = vec![false; self.node_count()];
        let mut stack = vec![(self.root.index(), 0usize)];

        while let Some(top) = stack.len().checked_sub(1) {
            let (node, next_dep) = stack[top];
            if visited[node] {
                stack.pop();
                continue;
            }
            let deps = self.dependencies(node);
            if next_dep < deps.len() {
                stack[top].1 = next_dep + 1;
                let dep = deps[next_dep];
                if !visited[dep] {
                    stack.push((dep, 0));
                }
            } else {
                visited[node] = true;
                order.push(node);
                stack.pop();
            }
        }
        order
    }
}

/// Resolve `name` (possibly namespaced or an alias) with CLI arguments
/// into an execution graph.
pub fn resolve(
    model: &Jakefile,
    flags: RunFlags,
    overrides: &HashMap<String, String>,
    name: &str,
    args: &[String],
) -> Result<ExecutionGraph> {
    let qualified = model
        .resolve_name(None, name)
        .ok_or_else(|| JakeError::UnknownRecipe {
            name: name.to_string(),
            suggestion: suggest(model, name),
        })?;

    let mut resolver = Resolver {
        model,
        flags,
        overrides,
        graph: DiGraph::new(),
        memo: HashMap::new(),
        stack: Vec::new(),
    };
    let root = resolver.resolve_recipe(&qualified, args)?;

    Ok(ExecutionGraph {
        graph: resolver.graph,
        root,
    })
}

/// Nearest recipe or alias name, case-insensitive.
fn suggest(model: &Jakefile, name: &str) -> Option<String> {
    let wanted = name.to_lowercase();
    model
        .recipes
        .keys()
        .chain(model.aliases.keys())
        .map(|candidate| {
            (
                strsim::levenshtein(&candidate.to_lowercase(), &wanted),
                candidate,
            )
        })
        .filter(|(distance, _)| *distance <= SUGGESTION_THRESHOLD)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate.clone())
}

struct Resolver<'a> {
    model: &'a Jakefile,
    flags: RunFlags,
    overrides: &'a HashMap<String, String>,
    graph: DiGraph<ExecNode, ()>,
    memo: HashMap<(String, Vec<String>), NodeIndex>,
    /// Grey set: qualified names on the active DFS path
    stack: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn resolve_recipe(&mut self, qualified: &str, args: &[String]) -> Result<NodeIndex> {
        let memo_key = (qualified.to_string(), args.to_vec());
        if let Some(&index) = self.memo.get(&memo_key) {
            return Ok(index);
        }

        if let Some(start) = self.stack.iter().position(|n| n == qualified) {
            let mut members: Vec<String> = self.stack[start..].to_vec();
            members.push(qualified.to_string());
            return Err(JakeError::DependencyCycle { members });
        }

        let recipe = self
            .model
            .recipes
            .get(qualified)
            .ok_or_else(|| JakeError::UnknownRecipe {
                name: qualified.to_string(),
                suggestion: suggest(self.model, qualified),
            })?;

        let params = self.bind_arguments(recipe, args)?;

        self.stack.push(qualified.to_string());
        let result = self.resolve_dependencies(recipe);
        self.stack.pop();
        let deps = result?;

        let index = self.graph.add_node(ExecNode {
            recipe: qualified.to_string(),
            params,
            positional: args.to_vec(),
        });
        for dep in deps {
            self.graph.add_edge(dep, index, ());
        }
        self.memo.insert(memo_key, index);
        Ok(index)
    }

    fn resolve_dependencies(&mut self, recipe: &Recipe) -> Result<Vec<NodeIndex>> {
        let namespace = recipe.namespace.as_deref();
        let mut deps = Vec::new();
        let mut dep_names = Vec::new();

        for reference in &recipe.dependencies {
            let qualified = self
                .model
                .resolve_name(namespace, reference)
                .ok_or_else(|| JakeError::UnknownRecipe {
                    name: reference.clone(),
                    suggestion: suggest(self.model, reference),
                })?;
            if !dep_names.contains(&qualified) {
                dep_names.push(qualified.clone());
                deps.push(self.resolve_recipe(&qualified, &[])?);
            }
        }

        // Implicit install recipes for missing tools, deduplicated on
        // qualified name against the declared dependencies.
        for need in collect_tool_needs(recipe) {
            let install = match &need.install_recipe {
                Some(install) => install,
                None => continue,
            };
            let path_var = self.model.env.get("PATH").map(String::as_str);
            if functions::find_command(&need.command, path_var).is_some() {
                continue;
            }
            let qualified = self
                .model
                .resolve_name(namespace, install)
                .ok_or_else(|| JakeError::UnknownRecipe {
                    name: install.clone(),
                    suggestion: suggest(self.model, install),
                })?;
            if !dep_names.contains(&qualified) {
                dep_names.push(qualified.clone());
                deps.push(self.resolve_recipe(&qualified, &[])?);
            }
        }

        Ok(deps)
    }

    /// Match positional arguments against declared parameters.
    fn bind_arguments(
        &self,
        recipe: &Recipe,
        args: &[String],
    ) -> Result<IndexMap<String, String>> {
        let mut ctx = EvalContext::new(self.model, self.flags);
        ctx.namespace = recipe.namespace.clone();
        ctx.overrides = self.overrides.clone();

        let mut bound = IndexMap::new();
        let mut rest = args;

        for (position, param) in recipe.parameters.iter().enumerate() {
            match param.variadic {
                Variadic::None => {
                    if let Some((first, tail)) = rest.split_first() {
                        bound.insert(param.name.clone(), first.clone());
                        rest = tail;
                    } else if let Some(default) = &param.default {
                        bound.insert(param.name.clone(), ctx.eval(default)?);
                    } else {
                        return Err(self.parameter_error(recipe, args.len()));
                    }
                }
                Variadic::OneOrMore | Variadic::ZeroOrMore => {
                    debug_assert_eq!(position, recipe.parameters.len() - 1);
                    if rest.is_empty() {
                        if param.variadic == Variadic::OneOrMore {
                            if let Some(default) = &param.default {
                                bound.insert(param.name.clone(), ctx.eval(default)?);
                                continue;
                            }
                            return Err(self.parameter_error(recipe, args.len()));
                        }
                        bound.insert(param.name.clone(), String::new());
                    } else {
                        bound.insert(param.name.clone(), rest.join(" "));
                        rest = &[];
                    }
                }
            }
        }

        if !rest.is_empty() {
            return Err(JakeError::Arity {
                message: format!(
                    "recipe `{}` takes at most {} argument(s), got {}",
                    recipe.qualified_name(),
                    recipe.parameters.len(),
                    args.len()
                ),
            });
        }

        Ok(bound)
    }

    fn parameter_error(&self, recipe: &Recipe, got: usize) -> JakeError {
        let summary = recipe
            .parameters
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        JakeError::Arity {
            message: format!(
                "recipe `{}` expects parameters: {}; got {} argument(s)",
                recipe.qualified_name(),
                summary,
                got
            ),
        }
    }
}

/// Attribute-level and body-level tool needs, in declaration order.
fn collect_tool_needs(recipe: &Recipe) -> Vec<&ToolNeed> {
    fn walk<'a>(items: &'a [BodyItem], out: &mut Vec<&'a ToolNeed>) {
        for item in items {
            match item {
                BodyItem::Directive(Directive::Needs(needs)) => out.extend(needs.iter()),
                BodyItem::Directive(Directive::If(ifd)) => {
                    for branch in &ifd.branches {
                        walk(&branch.body, out);
                    }
                    if let Some(else_body) = &ifd.else_body {
                        walk(else_body, out);
                    }
                }
                BodyItem::Directive(Directive::Each { body, .. }) => walk(body, out),
                _ => {}
            }
        }
    }

    let mut out: Vec<&ToolNeed> = recipe.attributes.needs.iter().collect();
    walk(&recipe.body, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn model_from(content: &str) -> Jakefile {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Jakefile");
        fs::write(&path, content).unwrap();
        let model = loader::load(&path).unwrap();
        // keep the tempdir alive via leak; tests are short-lived
        std::mem::forget(dir);
        model
    }

    fn resolve_simple(model: &Jakefile, name: &str, args: &[&str]) -> Result<ExecutionGraph> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        resolve(model, RunFlags::default(), &HashMap::new(), name, &args)
    }

    fn index_of(graph: &ExecutionGraph, name: &str) -> usize {
        (0..graph.node_count())
            .find(|&i| graph.node(i).recipe == name)
            .unwrap()
    }

    #[test]
    fn test_linear_dependencies() {
        let model = model_from(
            "task a: [b]\n    echo a\n\ntask b: [c]\n    echo b\n\ntask c:\n    echo c\n",
        );
        let graph = resolve_simple(&model, "a", &[]).unwrap();
        assert_eq!(graph.node_count(), 3);
        let names: Vec<&str> = graph
            .topo_order()
            .iter()
            .map(|&i| graph.node(i).recipe.as_str())
            .collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_diamond_is_shared() {
        let model = model_from(
            "task top: [left, right]\n    echo t\n\ntask left: [base]\n    echo l\n\ntask right: [base]\n    echo r\n\ntask base:\n    echo b\n",
        );
        let graph = resolve_simple(&model, "top", &[]).unwrap();
        // base resolves once
        assert_eq!(graph.node_count(), 4);
        let base = index_of(&graph, "base");
        assert_eq!(graph.dependents(base).len(), 2);
    }

    #[test]
    fn test_cycle_detection_names_members() {
        let model = model_from(
            "task a: [b]\n    echo a\n\ntask b: [c]\n    echo b\n\ntask c: [a]\n    echo c\n",
        );
        let err = resolve_simple(&model, "a", &[]).unwrap_err();
        assert_eq!(err.kind(), "dependency-cycle");
        let message = err.to_string();
        assert!(message.contains("a"));
        assert!(message.contains("b"));
        assert!(message.contains("c"));
    }

    #[test]
    fn test_unknown_recipe_suggestion() {
        let model = model_from("task build:\n    echo hi\n");
        let err = resolve_simple(&model, "biuld", &[]).unwrap_err();
        assert_eq!(err.kind(), "unknown-recipe");
        assert!(err.to_string().contains("did you mean `build`?"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_argument_binding_with_defaults() {
        let model = model_from("task deploy env target=\"prod\":\n    echo {{env}} {{target}}\n");
        let graph = resolve_simple(&model, "deploy", &["staging"]).unwrap();
        let root = graph.root_node();
        assert_eq!(root.params.get("env").map(String::as_str), Some("staging"));
        assert_eq!(root.params.get("target").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_missing_argument_reports_parameter_summary() {
        let model = model_from("task deploy env target:\n    echo x\n");
        let err = resolve_simple(&model, "deploy", &["one"]).unwrap_err();
        assert_eq!(err.kind(), "arity");
        assert!(err.to_string().contains("env target"));
    }

    #[test]
    fn test_too_many_arguments() {
        let model = model_from("task t:\n    echo x\n");
        let err = resolve_simple(&model, "t", &["extra"]).unwrap_err();
        assert_eq!(err.kind(), "arity");
    }

    #[test]
    fn test_variadic_binding() {
        let model = model_from("task run cmd *rest:\n    echo {{cmd}} {{rest}}\n");
        let graph = resolve_simple(&model, "run", &["ls", "-l", "-a"]).unwrap();
        let root = graph.root_node();
        assert_eq!(root.params.get("rest").map(String::as_str), Some("-l -a"));
        assert_eq!(root.positional, vec!["ls", "-l", "-a"]);
    }

    #[test]
    fn test_one_or_more_variadic_requires_value() {
        let model = model_from("task lint +files:\n    echo {{files}}\n");
        assert!(resolve_simple(&model, "lint", &[]).is_err());
        assert!(resolve_simple(&model, "lint", &["a.c"]).is_ok());
    }

    #[test]
    fn test_dependencies_resolve_with_defaults() {
        let model = model_from(
            "task top: [helper]\n    echo t\n\ntask helper mode=\"quick\":\n    echo {{mode}}\n",
        );
        let graph = resolve_simple(&model, "top", &[]).unwrap();
        let helper = graph.nodes().find(|n| n.recipe == "helper").unwrap();
        assert_eq!(helper.params.get("mode").map(String::as_str), Some("quick"));
    }

    #[test]
    fn test_missing_tool_injects_install_recipe() {
        let model = model_from(
            "@needs definitely-not-a-tool-xyz -> install_tool\ntask deploy:\n    echo d\n\ntask install_tool:\n    echo install\n",
        );
        let graph = resolve_simple(&model, "deploy", &[]).unwrap();
        assert!(graph.nodes().any(|n| n.recipe == "install_tool"));
    }

    #[test]
    fn test_install_recipe_deduplicated_against_declared_dep() {
        let model = model_from(
            "@needs definitely-not-a-tool-xyz -> install_tool\ntask deploy: [install_tool]\n    echo d\n\ntask install_tool:\n    echo install\n",
        );
        let graph = resolve_simple(&model, "deploy", &[]).unwrap();
        assert_eq!(graph.dependencies(graph.root_index()).len(), 1);
    }

    #[test]
    fn test_namespaced_resolution() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("lib.jake"), "task build:\n    echo lib\n").unwrap();
        let path: PathBuf = dir.path().join("Jakefile");
        fs::write(&path, "@import \"lib.jake\" as a\n").unwrap();
        let model = loader::load(&path).unwrap();

        assert!(resolve_simple(&model, "a.build", &[]).is_ok());
        let err = resolve_simple(&model, "build", &[]).unwrap_err();
        assert_eq!(err.kind(), "unknown-recipe");
    }

    #[test]
    fn test_alias_resolves() {
        let model = model_from("@alias b\ntask build:\n    echo hi\n");
        let graph = resolve_simple(&model, "b", &[]).unwrap();
        assert_eq!(graph.root_node().recipe, "build");
    }

    #[test]
    fn test_edge_ordering_invariant() {
        let model = model_from(
            "task all: [t0, t1, t2]\n    echo done\n\ntask t0:\n    echo 0\n\ntask t1:\n    echo 1\n\ntask t2:\n    echo 2\n",
        );
        let graph = resolve_simple(&model, "all", &[]).unwrap();
        let order = graph.topo_order();
        let mut position = vec![0usize; graph.node_count()];
        for (slot, &node) in order.iter().enumerate() {
            position[node] = slot;
        }
        for index in 0..graph.node_count() {
            for dep in graph.dependencies(index) {
                assert!(position[dep] < position[index]);
            }
        }
        // siblings keep source order in the serial schedule
        assert!(position[index_of(&graph, "t0")] < position[index_of(&graph, "t1")]);
        assert!(position[index_of(&graph, "t1")] < position[index_of(&graph, "t2")]);
    }

    #[test]
    fn test_dependencies_in_declaration_order() {
        let model = model_from(
            "task all: [t2, t0, t1]\n    echo done\n\ntask t0:\n    echo 0\n\ntask t1:\n    echo 1\n\ntask t2:\n    echo 2\n",
        );
        let graph = resolve_simple(&model, "all", &[]).unwrap();
        let deps: Vec<&str> = graph
            .dependencies(graph.root_index())
            .iter()
            .map(|&i| graph.node(i).recipe.as_str())
            .collect();
        assert_eq!(deps, vec!["t2", "t0", "t1"]);
    }
}
