//! File Watcher
//!
//! Poll-based watch loop for `--watch`. Patterns come from each
//! reachable recipe's `@watch` lists, falling back to `@cache` patterns,
//! then to the Jakefile itself. The loop snapshots `(path, mtime)` for
//! the expanded file set and polls at a fixed interval; any add, remove,
//! or mtime change triggers a re-run after a short debounce window.
//!
//! The watch driver (in the `Jake` facade) runs the scheduler on a
//! separate thread and uses the shared cancellation token to stop an
//! in-flight execution when a change arrives.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::cache;
use crate::errors::{JakeError, Result};
use crate::eval::{EvalContext, RunFlags};
use crate::loader::Jakefile;
use crate::resolver::ExecutionGraph;

/// Poll interval between snapshots.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Debounce window absorbing bursts of changes.
pub const DEBOUNCE: Duration = Duration::from_millis(50);
/// Grace period between SIGTERM and SIGKILL for in-flight children.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Collect watch patterns for the reachable recipes of a resolved graph.
pub fn collect_patterns(
    model: &Jakefile,
    graph: &ExecutionGraph,
    flags: RunFlags,
    overrides: &HashMap<String, String>,
) -> Vec<String> {
    let mut patterns = eval_patterns(model, graph, flags, overrides, PatternSource::Watch);
    if patterns.is_empty() {
        patterns = eval_patterns(model, graph, flags, overrides, PatternSource::Cache);
    }
    if patterns.is_empty() {
        patterns.push(model.path.display().to_string());
    }
    patterns.dedup();
    patterns
}

#[derive(Clone, Copy)]
enum PatternSource {
    Watch,
    Cache,
}

fn eval_patterns(
    model: &Jakefile,
    graph: &ExecutionGraph,
    flags: RunFlags,
    overrides: &HashMap<String, String>,
    source: PatternSource,
) -> Vec<String> {
    let mut out = Vec::new();
    for node in graph.nodes() {
        let recipe = match model.recipes.get(&node.recipe) {
            Some(recipe) => recipe,
            None => continue,
        };
        let mut ctx = EvalContext::new(model, flags);
        ctx.namespace = recipe.namespace.clone();
        ctx.params = node.params.clone();
        ctx.positional = node.positional.clone();
        ctx.overrides = overrides.clone();

        let exprs = match source {
            PatternSource::Watch => recipe.watch_patterns(),
            PatternSource::Cache => recipe.cache_patterns(),
        };
        for expr in exprs {
            if let Ok(value) = ctx.eval(expr) {
                if !out.contains(&value) {
                    out.push(value);
                }
            }
        }
    }
    out
}

/// Snapshot-and-compare watcher over a glob-expanded file set.
pub struct Watcher {
    base: PathBuf,
    patterns: Vec<String>,
    snapshot: BTreeMap<PathBuf, SystemTime>,
}

impl Watcher {
    pub fn new(base: PathBuf, patterns: Vec<String>) -> Result<Self> {
        let snapshot = take_snapshot(&base, &patterns)?;
        Ok(Self {
            base,
            patterns,
            snapshot,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Re-expand the patterns and compare against the last snapshot.
    /// On change the snapshot is replaced, so one change reports once.
    pub fn poll_changed(&mut self) -> Result<bool> {
        let current = take_snapshot(&self.base, &self.patterns)?;
        if current != self.snapshot {
            self.snapshot = current;
            return Ok(true);
        }
        Ok(false)
    }

    /// Absorb a burst: sleep the debounce window, then re-snapshot so
    /// follow-up writes within the window do not trigger again.
    pub fn debounce(&mut self) -> Result<()> {
        std::thread::sleep(DEBOUNCE);
        self.snapshot = take_snapshot(&self.base, &self.patterns)?;
        Ok(())
    }
}

fn take_snapshot(
    base: &PathBuf,
    patterns: &[String],
) -> Result<BTreeMap<PathBuf, SystemTime>> {
    let files = cache::expand_globs(base, patterns).map_err(|err| JakeError::WatchIo {
        message: err.to_string(),
    })?;
    let mut snapshot = BTreeMap::new();
    for file in files {
        let mtime = std::fs::metadata(&file)
            .and_then(|m| m.modified())
            .map_err(|err| JakeError::WatchIo {
                message: format!("{}: {}", file.display(), err),
            })?;
        snapshot.insert(file, mtime);
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader;
    use crate::resolver;
    use std::fs;
    use tempfile::TempDir;

    fn graph_for(dir: &TempDir, content: &str, name: &str) -> (Jakefile, ExecutionGraph) {
        let path = dir.path().join("Jakefile");
        fs::write(&path, content).unwrap();
        let model = loader::load(&path).unwrap();
        let graph = resolver::resolve(
            &model,
            RunFlags::default(),
            &HashMap::new(),
            name,
            &[],
        )
        .unwrap();
        (model, graph)
    }

    #[test]
    fn test_patterns_from_watch_directive() {
        let dir = TempDir::new().unwrap();
        let (model, graph) = graph_for(
            &dir,
            "task dev:\n    @watch src/**/*.rs\n    echo run\n",
            "dev",
        );
        let patterns =
            collect_patterns(&model, &graph, RunFlags::default(), &HashMap::new());
        assert_eq!(patterns, vec!["src/**/*.rs"]);
    }

    #[test]
    fn test_fallback_to_cache_patterns() {
        let dir = TempDir::new().unwrap();
        let (model, graph) = graph_for(
            &dir,
            "task build:\n    @cache src/*.c\n    echo build\n",
            "build",
        );
        let patterns =
            collect_patterns(&model, &graph, RunFlags::default(), &HashMap::new());
        assert_eq!(patterns, vec!["src/*.c"]);
    }

    #[test]
    fn test_fallback_to_jakefile_itself() {
        let dir = TempDir::new().unwrap();
        let (model, graph) = graph_for(&dir, "task t:\n    echo x\n", "t");
        let patterns =
            collect_patterns(&model, &graph, RunFlags::default(), &HashMap::new());
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].ends_with("Jakefile"));
    }

    #[test]
    fn test_detects_modification() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        let mut watcher = Watcher::new(
            dir.path().to_path_buf(),
            vec!["*.txt".to_string()],
        )
        .unwrap();
        assert!(!watcher.poll_changed().unwrap());

        // bump the mtime explicitly; filesystem clock granularity can
        // otherwise swallow a fast rewrite
        let file = fs::OpenOptions::new()
            .write(true)
            .open(dir.path().join("a.txt"))
            .unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();
        assert!(watcher.poll_changed().unwrap());
    }

    #[test]
    fn test_detects_add_and_remove() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        let mut watcher = Watcher::new(
            dir.path().to_path_buf(),
            vec!["*.txt".to_string()],
        )
        .unwrap();

        fs::write(dir.path().join("b.txt"), "new").unwrap();
        assert!(watcher.poll_changed().unwrap());

        fs::remove_file(dir.path().join("b.txt")).unwrap();
        assert!(watcher.poll_changed().unwrap());
    }

    #[test]
    fn test_change_reports_once() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "one").unwrap();
        let mut watcher = Watcher::new(
            dir.path().to_path_buf(),
            vec!["*.txt".to_string()],
        )
        .unwrap();

        fs::write(dir.path().join("b.txt"), "new").unwrap();
        assert!(watcher.poll_changed().unwrap());
        assert!(!watcher.poll_changed().unwrap());
    }
}
