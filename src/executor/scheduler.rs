//! DAG Scheduler
//!
//! Executes a resolved graph either serially (deterministic topological
//! order, source order among independent siblings) or with a bounded
//! pool of OS-thread workers over a FIFO ready queue.
//!
//! A node becomes ready when every predecessor is `success` or
//! `cached-skip`. A failure cancels all transitive dependents while
//! independent branches run to completion. Cancellation (watch mode) is
//! observed between nodes; in-flight subprocesses are terminated by the
//! watcher through the shared token.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::executor::{runner, NodeOutcome, NodeState, RunContext};
use crate::resolver::ExecutionGraph;

/// Final per-node states of one scheduling pass.
#[derive(Debug)]
pub struct ScheduleReport {
    pub states: Vec<NodeState>,
    pub failed: bool,
    pub cancelled: bool,
}

impl ScheduleReport {
    fn from_states(states: Vec<NodeState>) -> Self {
        let failed = states.contains(&NodeState::Failed);
        let cancelled = states.contains(&NodeState::Cancelled);
        Self {
            states,
            failed,
            cancelled,
        }
    }
}

/// Execute the graph with the context's configured job count.
pub fn execute(ctx: &RunContext, graph: &ExecutionGraph) -> ScheduleReport {
    if ctx.jobs <= 1 || graph.node_count() <= 1 {
        serial(ctx, graph)
    } else {
        parallel(ctx, graph)
    }
}

fn outcome_state(outcome: NodeOutcome) -> NodeState {
    match outcome {
        NodeOutcome::Success => NodeState::Success,
        NodeOutcome::CachedSkip => NodeState::CachedSkip,
        NodeOutcome::Failed(_) => NodeState::Failed,
        NodeOutcome::Cancelled => NodeState::Cancelled,
    }
}

fn serial(ctx: &RunContext, graph: &ExecutionGraph) -> ScheduleReport {
    let mut states = vec![NodeState::Pending; graph.node_count()];

    for index in graph.topo_order() {
        if ctx.cancel.is_cancelled() {
            states[index] = NodeState::Cancelled;
            continue;
        }
        let blocked = graph
            .dependencies(index)
            .iter()
            .any(|&dep| !states[dep].satisfies_dependents());
        if blocked {
            states[index] = NodeState::Cancelled;
            continue;
        }
        states[index] = NodeState::Running;
        states[index] = outcome_state(runner::run_node(ctx, graph.node(index)));
        if states[index] == NodeState::Failed {
            report_failure_path(ctx, graph, index);
        }
    }

    ScheduleReport::from_states(states)
}

/// Verbose diagnostics: the resolver path from the root to a failed node.
fn report_failure_path(ctx: &RunContext, graph: &ExecutionGraph, target: usize) {
    if !ctx.flags.verbose {
        return;
    }
    let mut path = vec![target];
    let mut current = target;
    while current != graph.root_index() {
        match graph.dependents(current).first() {
            Some(&parent) => {
                path.push(parent);
                current = parent;
            }
            None => break,
        }
    }
    let chain: Vec<&str> = path
        .iter()
        .rev()
        .map(|&i| graph.node(i).recipe.as_str())
        .collect();
    ctx.output
        .note(&format!("  resolver path: {}", chain.join(" -> ")));
}

struct SchedState {
    states: Vec<NodeState>,
    /// Unfinished predecessors per node
    remaining: Vec<usize>,
    ready: VecDeque<usize>,
    completed: usize,
}

fn parallel(ctx: &RunContext, graph: &ExecutionGraph) -> ScheduleReport {
    let node_count = graph.node_count();
    let mut initial = SchedState {
        states: vec![NodeState::Pending; node_count],
        remaining: (0..node_count)
            .map(|index| graph.dependencies(index).len())
            .collect(),
        ready: VecDeque::new(),
        completed: 0,
    };
    // Seed in topological order so the FIFO pop is deterministic for the
    // initial wave.
    for index in graph.topo_order() {
        if graph.dependencies(index).is_empty() {
            initial.states[index] = NodeState::Ready;
            initial.ready.push_back(index);
        }
    }

    let state = Mutex::new(initial);
    let cvar = Condvar::new();
    let workers = ctx.jobs.min(node_count).max(1);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| worker_loop(ctx, graph, &state, &cvar));
        }
    });

    ScheduleReport::from_states(state.into_inner().unwrap().states)
}

fn worker_loop(
    ctx: &RunContext,
    graph: &ExecutionGraph,
    state: &Mutex<SchedState>,
    cvar: &Condvar,
) {
    let node_count = graph.node_count();
    loop {
        let mut s = state.lock().unwrap();
        let index = loop {
            if s.completed == node_count {
                cvar.notify_all();
                return;
            }
            if ctx.cancel.is_cancelled() {
                for i in 0..node_count {
                    if matches!(s.states[i], NodeState::Pending | NodeState::Ready) {
                        s.states[i] = NodeState::Cancelled;
                        s.completed += 1;
                    }
                }
                s.ready.clear();
                cvar.notify_all();
                return;
            }
            if let Some(index) = s.ready.pop_front() {
                break index;
            }
            s = cvar.wait(s).unwrap();
        };

        s.states[index] = NodeState::Running;
        drop(s);

        let outcome = runner::run_node(ctx, graph.node(index));

        if matches!(outcome, NodeOutcome::Failed(_)) {
            report_failure_path(ctx, graph, index);
        }

        let mut s = state.lock().unwrap();
        let new_state = outcome_state(outcome);
        s.states[index] = new_state;
        s.completed += 1;

        if new_state.satisfies_dependents() {
            for dependent in graph.dependents(index) {
                s.remaining[dependent] -= 1;
                if s.remaining[dependent] == 0 && s.states[dependent] == NodeState::Pending {
                    s.states[dependent] = NodeState::Ready;
                    s.ready.push_back(dependent);
                }
            }
        } else {
            // Cancel every transitive dependent that has not started.
            let mut stack = graph.dependents(index);
            while let Some(blocked) = stack.pop() {
                if s.states[blocked] == NodeState::Pending {
                    s.states[blocked] = NodeState::Cancelled;
                    s.completed += 1;
                    stack.extend(graph.dependents(blocked));
                }
            }
        }
        cvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::RunFlags;
    use crate::executor::OutputSink;
    use crate::loader;
    use crate::resolver;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn run_with_jobs(content: &str, name: &str, jobs: usize) -> (ScheduleReport, String) {
        let dir = TempDir::new().unwrap();
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
        let mut ctx = RunContext::new(&model, RunFlags::default());
        ctx.jobs = jobs;
        ctx.output = OutputSink::captured();
        let report = execute(&ctx, &graph);
        let output = ctx.output.take();
        (report, output)
    }

    const FAN_IN: &str = "task all: [t0, t1, t2]\n    echo all done\n\ntask t0:\n    echo 0\n\ntask t1:\n    echo 1\n\ntask t2:\n    echo 2\n";

    #[cfg(unix)]
    #[test]
    fn test_serial_runs_in_source_order() {
        let (report, output) = run_with_jobs(FAN_IN, "all", 1);
        assert!(!report.failed);
        assert_eq!(output, "0\n1\n2\nall done\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_parallel_runs_all_then_sink() {
        let (report, output) = run_with_jobs(FAN_IN, "all", 3);
        assert!(!report.failed);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3], "all done");
        let mut heads: Vec<&str> = lines[..3].to_vec();
        heads.sort_unstable();
        assert_eq!(heads, vec!["0", "1", "2"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_cancels_dependents_but_not_siblings() {
        let content = "task all: [bad, good]\n    echo all\n\ntask bad:\n    exit 1\n\ntask good:\n    echo good ran\n";
        let (report, output) = run_with_jobs(content, "all", 1);
        assert!(report.failed);
        assert!(output.contains("good ran"));
        assert!(!output.contains("all\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_parallel_and_serial_agree_on_outcomes() {
        let content = "task all: [ok1, bad, ok2]\n    echo sink\n\ntask ok1:\n    echo 1\n\ntask bad:\n    exit 7\n\ntask ok2:\n    echo 2\n";
        let (serial_report, _) = run_with_jobs(content, "all", 1);
        let (parallel_report, _) = run_with_jobs(content, "all", 4);
        assert!(serial_report.failed);
        assert!(parallel_report.failed);
        assert_eq!(
            serial_report.states.iter().filter(|s| **s == NodeState::Failed).count(),
            parallel_report.states.iter().filter(|s| **s == NodeState::Failed).count(),
        );
        assert_eq!(
            serial_report.states.iter().filter(|s| **s == NodeState::Cancelled).count(),
            parallel_report.states.iter().filter(|s| **s == NodeState::Cancelled).count(),
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_deep_chain_ordering() {
        let content = "task a: [b]\n    echo a\n\ntask b: [c]\n    echo b\n\ntask c:\n    echo c\n";
        for jobs in [1, 4] {
            let (report, output) = run_with_jobs(content, "a", jobs);
            assert!(!report.failed);
            assert_eq!(output, "c\nb\na\n");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Jakefile");
        fs::write(&path, "task t:\n    echo never\n").unwrap();
        let model = loader::load(&path).unwrap();
        let graph = resolver::resolve(
            &model,
            RunFlags::default(),
            &HashMap::new(),
            "t",
            &[],
        )
        .unwrap();
        let mut ctx = RunContext::new(&model, RunFlags::default());
        ctx.output = OutputSink::captured();
        ctx.cancel.cancel();
        let report = execute(&ctx, &graph);
        assert!(report.cancelled);
        assert_eq!(ctx.output.take(), "");
    }

    #[cfg(unix)]
    #[test]
    fn test_cached_skip_satisfies_dependents() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("input.txt"), "data").unwrap();
        let path = dir.path().join("Jakefile");
        fs::write(
            &path,
            "task top: [cached]\n    echo top\n\ntask cached:\n    @cache input.txt\n    echo cached-work\n",
        )
        .unwrap();
        let model = loader::load(&path).unwrap();
        let graph = resolver::resolve(
            &model,
            RunFlags::default(),
            &HashMap::new(),
            "top",
            &[],
        )
        .unwrap();
        let mut ctx = RunContext::new(&model, RunFlags::default());
        ctx.output = OutputSink::captured();

        let report = execute(&ctx, &graph);
        assert!(!report.failed);
        assert_eq!(ctx.output.take(), "cached-work\ntop\n");

        let report = execute(&ctx, &graph);
        assert!(!report.failed);
        // second pass: cached dependency skips, dependent still runs
        assert_eq!(ctx.output.take(), "top\n");
    }
}
