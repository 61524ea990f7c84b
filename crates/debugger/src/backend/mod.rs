//! The seam between the session and the native debugger
//!
//! [`DebuggerBackend`] is what the session needs from a debugger: target
//! inspection, process control, breakpoints, symbol lookup and a bounded wait
//! for process events. [`LldbBackend`] implements it on top of DWARF and
//! `lldb-dap`; [`crate::testing::FakeBackend`] scripts it for tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::io_relay::StdioPaths;
use crate::state::ProcessState;
use crate::types::{BreakpointId, LineEntry, TargetInfo};

mod dwarf;
mod lldb;

pub use dwarf::DebugInfo;
pub use lldb::{LldbBackend, LldbBackendOptions};

/// What a thread was doing when the process stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The thread is not the reason for the stop
    None,
    Breakpoint { id: BreakpointId },
    Step,
    Signal(String),
    Exception(String),
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStop {
    pub thread_id: i64,
    pub reason: StopReason,
}

impl ThreadStop {
    pub fn new(thread_id: i64, reason: StopReason) -> Self {
        Self { thread_id, reason }
    }

    pub fn is_valid(&self) -> bool {
        self.thread_id > 0
    }
}

/// Something the backend observed about the debuggee
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The process moved to `state`; `threads` lists stop reasons for `Stopped`
    State {
        state: ProcessState,
        threads: Vec<ThreadStop>,
        exit_code: Option<i64>,
    },
    /// Diagnostic text from the debugger itself
    Console(String),
}

impl BackendEvent {
    pub fn state(state: ProcessState) -> Self {
        BackendEvent::State {
            state,
            threads: Vec::new(),
            exit_code: None,
        }
    }

    pub fn stopped(threads: Vec<ThreadStop>) -> Self {
        BackendEvent::State {
            state: ProcessState::Stopped,
            threads,
            exit_code: None,
        }
    }

    pub fn exited(exit_code: Option<i64>) -> Self {
        BackendEvent::State {
            state: ProcessState::Exited,
            threads: Vec::new(),
            exit_code,
        }
    }
}

/// Everything needed to start the debuggee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub stdio: StdioPaths,
    pub stop_on_entry: bool,
}

pub trait DebuggerBackend: Send + Sync + 'static {
    /// Load the executable and describe its modules and compile units
    fn create_target(&self, executable: &Path) -> eyre::Result<TargetInfo>;

    /// Start the debuggee asynchronously with its stdio redirected
    fn launch(&self, request: &LaunchRequest) -> eyre::Result<()>;

    fn continue_process(&self) -> eyre::Result<()>;

    fn step_into(&self) -> eyre::Result<()>;

    fn step_over(&self) -> eyre::Result<()>;

    /// Terminate the debuggee; a no-op when nothing is running
    fn kill(&self) -> eyre::Result<()>;

    fn create_breakpoint(&self, file: &Path, line: u32) -> eyre::Result<BreakpointId>;

    fn delete_breakpoint(&self, id: BreakpointId) -> eyre::Result<()>;

    /// Declaration sites of functions named `name`
    fn find_symbol(&self, name: &str) -> eyre::Result<Vec<LineEntry>>;

    /// Wait up to `timeout` for the next event
    fn wait_for_event(&self, timeout: Duration) -> eyre::Result<Option<BackendEvent>>;
}
