//! Debug session core
//!
//! [`DebugSession`] drives a [`DebuggerBackend`] on behalf of a UI: it keeps
//! the breakpoint ledger and source tree, and runs one background thread per
//! launch that turns backend events into [`Event`]s the UI applies on its own
//! turn.
pub mod backend;
mod commands;
mod debugger;
mod error;
mod internals;
mod io_relay;
pub(crate) mod state;
pub mod testing;
mod types;
pub mod utils;

pub use backend::{DebuggerBackend, LldbBackend, LldbBackendOptions};
pub use commands::{ParsedCommand, parse as parse_command};
pub use debugger::{DebugSession, SessionOptions};
pub use error::SessionError;
pub use io_relay::{ConsoleBuffer, ProcessIORelay, StdioPaths};
pub use source_tree::{NodeId, SourceTree};
pub use state::{Event, ProcessState};
pub use types::{
    BreakpointId, BreakpointRecord, CompileUnit, LineEntry, Location, Module, Target, TargetInfo,
};
