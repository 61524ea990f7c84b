use std::path::PathBuf;

use source_tree::NodeId;

/// Lifecycle of the debuggee as last reported by the event thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    NotLaunched,
    Launching,
    Running,
    Stopped,
    Exited,
    Crashed,
}

impl ProcessState {
    /// States from which a new launch may start
    pub fn can_launch(self) -> bool {
        matches!(
            self,
            ProcessState::NotLaunched | ProcessState::Exited | ProcessState::Crashed
        )
    }

    /// The process has gone and will produce no more events
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Exited | ProcessState::Crashed)
    }
}

/// Requests passed to the UI thread
///
/// These are the only values that cross from the event thread to the UI. The
/// first three are also queued by UI widgets for the UI loop to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Continue,
    StepOver,
    StepInto,
    /// Load the file behind this node and show it
    LoadFile(NodeId),
    /// Text the debuggee wrote to stdout or stderr
    Io(String),
    /// Bring the file at this path to the front
    SwitchToFile(PathBuf),
}
