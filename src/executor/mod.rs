//! Execution Engine
//!
//! Shared execution state for one resolve/execute cycle: node states,
//! the cancellation token, the run context handed to every worker, and
//! the output sink that serialises terminal writes.

pub mod hooks;
pub mod runner;
pub mod scheduler;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colored::Colorize;

use crate::cache::HashCache;
use crate::errors::JakeError;
use crate::eval::RunFlags;
use crate::loader::Jakefile;

/// Lifecycle of an execution node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Ready,
    Running,
    Success,
    CachedSkip,
    Failed,
    Cancelled,
}

impl NodeState {
    /// States that satisfy a dependent's predecessor requirement.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, Self::Success | Self::CachedSkip)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::CachedSkip | Self::Failed | Self::Cancelled
        )
    }
}

/// Outcome of running one node's body.
#[derive(Debug)]
pub enum NodeOutcome {
    Success,
    CachedSkip,
    Failed(JakeError),
    Cancelled,
}

/// Cancellation flag shared by the scheduler, runner, and watcher.
/// Workers check it between nodes and at subprocess wait boundaries;
/// the watcher escalates from SIGTERM to SIGKILL on live children.
#[derive(Default)]
pub struct CancelToken {
    flag: AtomicBool,
    children: Mutex<Vec<u32>>,
}

impl CancelToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn register_child(&self, pid: u32) {
        self.children.lock().unwrap().push(pid);
    }

    pub fn unregister_child(&self, pid: u32) {
        self.children.lock().unwrap().retain(|&p| p != pid);
    }

    /// Terminate live children: SIGTERM, then SIGKILL after the grace
    /// interval for any that survived.
    #[cfg(unix)]
    pub fn terminate_children(&self, grace: Duration) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let pids: Vec<u32> = self.children.lock().unwrap().clone();
        if pids.is_empty() {
            return;
        }
        for &pid in &pids {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        std::thread::sleep(grace);
        let survivors: Vec<u32> = self.children.lock().unwrap().clone();
        for pid in survivors {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    pub fn terminate_children(&self, _grace: Duration) {
        // Windows: children are killed on wait via the scheduler's
        // cancellation check.
    }
}

/// Where child output and diagnostics go. In capture mode (tests and the
/// library API) child stdout accumulates in a buffer; otherwise children
/// inherit the terminal and stream directly.
#[derive(Default)]
pub struct OutputSink {
    pub capture: bool,
    buffer: Mutex<String>,
}

impl OutputSink {
    pub fn captured() -> Self {
        Self {
            capture: true,
            buffer: Mutex::new(String::new()),
        }
    }

    pub fn append(&self, text: &str) {
        self.buffer.lock().unwrap().push_str(text);
    }

    pub fn take(&self) -> String {
        std::mem::take(&mut self.buffer.lock().unwrap())
    }

    /// Echo a command before running it (suppressed by `@`/`@quiet`).
    pub fn echo(&self, text: &str) {
        eprintln!("{}", text.dimmed());
    }

    pub fn note(&self, text: &str) {
        eprintln!("{}", text);
    }

    pub fn warn(&self, text: &str) {
        eprintln!("{}", format!("warning: {}", text).yellow());
    }

    pub fn error(&self, text: &str) {
        eprintln!("{}", format!("error: {}", text).red());
    }
}

/// Everything a worker needs to execute nodes.
pub struct RunContext<'a> {
    pub model: &'a Jakefile,
    pub flags: RunFlags,
    pub overrides: HashMap<String, String>,
    /// `--yes`: auto-accept every `@confirm`
    pub auto_yes: bool,
    /// Worker count for the parallel scheduler (1 = serial)
    pub jobs: usize,
    pub cancel: Arc<CancelToken>,
    pub cache: Mutex<HashCache>,
    pub output: OutputSink,
}

impl<'a> RunContext<'a> {
    pub fn new(model: &'a Jakefile, flags: RunFlags) -> Self {
        Self {
            model,
            flags,
            overrides: HashMap::new(),
            auto_yes: false,
            jobs: 1,
            cancel: CancelToken::new(),
            cache: Mutex::new(HashCache::load(&model.root_dir)),
            output: OutputSink::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_child_registry() {
        let token = CancelToken::new();
        token.register_child(42);
        token.register_child(43);
        token.unregister_child(42);
        assert_eq!(*token.children.lock().unwrap(), vec![43]);
    }

    #[test]
    fn test_output_capture() {
        let sink = OutputSink::captured();
        sink.append("line one\n");
        sink.append("line two\n");
        assert_eq!(sink.take(), "line one\nline two\n");
        assert_eq!(sink.take(), "");
    }

    #[test]
    fn test_node_state_predicates() {
        assert!(NodeState::Success.satisfies_dependents());
        assert!(NodeState::CachedSkip.satisfies_dependents());
        assert!(!NodeState::Failed.satisfies_dependents());
        assert!(NodeState::Cancelled.is_terminal());
        assert!(!NodeState::Running.is_terminal());
    }
}
