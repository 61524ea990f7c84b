use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use source_tree::{NodeId, SourceTree};

use crate::backend::{DebuggerBackend, LaunchRequest};
use crate::commands::{self, ParsedCommand};
use crate::error::SessionError;
use crate::internals::{EventBridge, SessionInternals, with_internals};
use crate::io_relay::{ConsoleBuffer, ProcessIORelay};
use crate::state::{Event, ProcessState};
use crate::types::{BreakpointId, BreakpointRecord, Location, Target};
use crate::utils;

/// How launched processes are started and watched
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Arguments passed to the debuggee
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub stop_on_entry: bool,
    /// Longest single wait of the event thread on the backend
    pub poll_interval: Duration,
    /// Most bytes relayed from each output stream per event-thread turn
    pub drain_chunk_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            working_directory: None,
            stop_on_entry: false,
            poll_interval: Duration::from_millis(50),
            drain_chunk_bytes: 64 * 1024,
        }
    }
}

/// Represents a debugging session
///
/// Operations are called from the UI thread. Each launch starts a background
/// thread that watches the backend and reports through [`DebugSession::events`].
pub struct DebugSession {
    backend: Arc<dyn DebuggerBackend>,
    options: SessionOptions,
    internals: Arc<Mutex<SessionInternals>>,
    tx: crossbeam_channel::Sender<Event>,
    rx: crossbeam_channel::Receiver<Event>,
    console: ConsoleBuffer,
    event_thread: Mutex<Option<JoinHandle<ProcessIORelay>>>,
    shutdown: Arc<AtomicBool>,
}

impl DebugSession {
    pub fn new(backend: Arc<dyn DebuggerBackend>, options: SessionOptions) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            backend,
            options,
            internals: Arc::new(Mutex::new(SessionInternals::default())),
            tx,
            rx,
            console: ConsoleBuffer::default(),
            event_thread: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load `executable` and index the sources of its compile units
    ///
    /// Breakpoints of a previous target are removed. Does not launch.
    #[tracing::instrument(skip(self, executable), fields(executable = %executable.as_ref().display()))]
    pub fn set_target(&self, executable: impl AsRef<Path>) -> Result<(), SessionError> {
        let executable = utils::normalise_path(executable.as_ref()).into_owned();

        let (state, old_breakpoints) = self.with_internals(|internals| {
            Ok((internals.state, internals.ledger.keys().copied().collect::<Vec<_>>()))
        })?;
        if !state.can_launch() {
            return Err(SessionError::InvalidState(format!(
                "cannot change target while the process is {state:?}"
            )));
        }

        let info = self
            .backend
            .create_target(&executable)
            .map_err(SessionError::backend)?;

        for id in old_breakpoints {
            if let Err(e) = self.backend.delete_breakpoint(id) {
                tracing::warn!(error = %e, id, "removing breakpoint of previous target");
            }
        }

        let mut tree = SourceTree::new();
        let mut missing = Vec::new();
        for module in &info.modules {
            tracing::info!(
                module = %module.name,
                compile_units = module.compile_units.len(),
                "module"
            );
            for unit in &module.compile_units {
                let Some(path) = unit.path() else {
                    tracing::debug!(?unit, "skipping compile unit without directory and file name");
                    continue;
                };
                if !path.exists() {
                    missing.push(path.clone());
                }
                tree.insert(&path);
            }
        }
        tracing::debug!(files = tree.leaves().len(), "source tree:\n{}", tree.render());
        if !missing.is_empty() {
            tracing::warn!(count = missing.len(), "source files not found on disk");
        }

        let target = Target {
            source_root: utils::find_source_root(&info.executable),
            executable: info.executable,
            modules: info.modules,
        };
        self.with_internals(|internals| {
            internals.tree = tree;
            internals.ledger.clear();
            internals.active_location = None;
            internals.missing_files = missing.into_iter().collect();
            internals.target = Some(target);
            Ok(())
        })
    }

    /// Start the target under the debugger
    ///
    /// Returns once the backend accepted the launch; progress is reported by
    /// the event thread.
    #[tracing::instrument(skip(self))]
    pub fn launch_target(&self) -> Result<(), SessionError> {
        let executable = self.with_internals(|internals| {
            let target = internals
                .target
                .as_ref()
                .ok_or_else(|| SessionError::Validation("no target selected".to_string()))?;
            if !target.executable.is_file() {
                return Err(SessionError::NotFound(format!(
                    "program {} does not exist",
                    target.executable.display()
                )));
            }
            if !internals.state.can_launch() {
                return Err(SessionError::InvalidState(format!(
                    "cannot launch while the process is {:?}",
                    internals.state
                )));
            }
            Ok(target.executable.clone())
        })?;

        self.join_event_thread();

        let mut relay = ProcessIORelay::new(self.options.drain_chunk_bytes);
        relay.create().map_err(SessionError::backend)?;
        let stdio = relay
            .paths()
            .ok_or_else(|| SessionError::InvalidState("redirect files missing".to_string()))?;

        let request = LaunchRequest {
            executable,
            args: self.options.args.clone(),
            working_directory: self.options.working_directory.clone(),
            stdio,
            stop_on_entry: self.options.stop_on_entry,
        };
        self.backend
            .launch(&request)
            .map_err(SessionError::backend)?;

        self.console.clear();
        self.with_internals(|internals| {
            internals.state = ProcessState::Launching;
            internals.active_location = None;
            Ok(())
        })?;

        let bridge = EventBridge {
            backend: Arc::clone(&self.backend),
            internals: Arc::clone(&self.internals),
            publisher: self.tx.clone(),
            console: self.console.clone(),
            relay,
            shutdown: Arc::clone(&self.shutdown),
            poll_interval: self.options.poll_interval,
        };
        match bridge.spawn() {
            Ok(handle) => {
                *self
                    .event_thread
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(handle);
                Ok(())
            }
            Err(e) => {
                if let Err(kill) = self.backend.kill() {
                    tracing::warn!(error = %kill, "stopping process after failed thread start");
                }
                self.with_internals(|internals| {
                    internals.state = ProcessState::Crashed;
                    Ok(())
                })?;
                Err(SessionError::backend(e))
            }
        }
    }

    /// Set a breakpoint on line `line_index` (0-based) of the file at `node`
    #[tracing::instrument(skip(self))]
    pub fn add_breakpoint(
        &self,
        node: NodeId,
        line_index: usize,
    ) -> Result<BreakpointId, SessionError> {
        let path = self.with_internals(|internals| {
            let path = loaded_file(internals, node)?;
            let lines = internals
                .tree
                .node(node)
                .and_then(|node| node.lines())
                .map_or(0, <[_]>::len);
            let line = internals
                .tree
                .node(node)
                .and_then(|node| node.line(line_index))
                .ok_or_else(|| {
                    SessionError::Validation(format!(
                        "line {} is out of range for {} ({lines} lines)",
                        line_index + 1,
                        path.display()
                    ))
                })?;
            if let Some(id) = line.breakpoint {
                return Err(SessionError::Validation(format!(
                    "line {} of {} already has breakpoint {id}",
                    line_index + 1,
                    path.display()
                )));
            }
            Ok(path)
        })?;

        let line = u32::try_from(line_index + 1).map_err(|_| {
            SessionError::Validation(format!("line {} is out of range", line_index + 1))
        })?;
        let id = self
            .backend
            .create_breakpoint(&path, line)
            .map_err(SessionError::backend)?;

        let location = Location::new(path, line);
        tracing::debug!(id, %location, "breakpoint added");
        self.with_internals(|internals| {
            if let Some(line) = internals
                .tree
                .node_mut(node)
                .and_then(|node| node.line_mut(line_index))
            {
                line.breakpoint = Some(id);
            }
            internals
                .ledger
                .insert(id, BreakpointRecord { id, location });
            Ok(id)
        })
    }

    /// Remove the breakpoint on line `line_index` (0-based) of `node`
    #[tracing::instrument(skip(self))]
    pub fn remove_breakpoint(&self, node: NodeId, line_index: usize) -> Result<(), SessionError> {
        let id = self.with_internals(|internals| {
            internals
                .tree
                .node(node)
                .and_then(|node| node.line(line_index))
                .and_then(|line| line.breakpoint)
                .ok_or_else(|| {
                    SessionError::NotFound(format!("no breakpoint on line {}", line_index + 1))
                })
        })?;

        self.backend
            .delete_breakpoint(id)
            .map_err(SessionError::backend)?;

        self.with_internals(|internals| {
            if let Some(line) = internals
                .tree
                .node_mut(node)
                .and_then(|node| node.line_mut(line_index))
            {
                line.breakpoint = None;
            }
            if let Some(record) = internals.ledger.remove(&id) {
                if internals.active_location.as_ref() == Some(&record.location) {
                    internals.active_location = None;
                }
                tracing::debug!(id, location = %record.location, "breakpoint removed");
            }
            Ok(())
        })
    }

    pub fn r#continue(&self) -> Result<(), SessionError> {
        self.ensure_stopped()?;
        self.backend
            .continue_process()
            .map_err(SessionError::backend)
    }

    pub fn step_into(&self) -> Result<(), SessionError> {
        self.ensure_stopped()?;
        self.backend.step_into().map_err(SessionError::backend)
    }

    pub fn step_over(&self) -> Result<(), SessionError> {
        self.ensure_stopped()?;
        self.backend.step_over().map_err(SessionError::backend)
    }

    pub fn next(&self) -> Result<(), SessionError> {
        self.step_over()
    }

    /// Run one line typed at the prompt
    #[tracing::instrument(skip(self))]
    pub fn exec_command(&self, text: &str) -> Result<(), SessionError> {
        match commands::parse(text) {
            ParsedCommand::BreakpointFileLine { file, line } => {
                let node = self
                    .with_internals(|internals| Ok(internals.tree.find_by_path(&file)))?
                    .ok_or_else(|| {
                        SessionError::NotFound(format!(
                            "{} is not a source file of the target",
                            file.display()
                        ))
                    })?;
                self.add_breakpoint(node, line as usize - 1).map(|_| ())
            }
            ParsedCommand::BreakpointSymbol(symbol) => self.break_on_symbol(&symbol),
            ParsedCommand::Run => self.launch_target(),
            ParsedCommand::Continue => self.r#continue(),
            ParsedCommand::Step => self.step_into(),
            ParsedCommand::Next => self.next(),
            ParsedCommand::Empty => Ok(()),
            ParsedCommand::Invalid(message) => Err(SessionError::Parse(message)),
        }
    }

    fn break_on_symbol(&self, symbol: &str) -> Result<(), SessionError> {
        let entries = self
            .backend
            .find_symbol(symbol)
            .map_err(SessionError::backend)?;
        if entries.is_empty() {
            return Err(SessionError::NotFound(format!("no function named {symbol}")));
        }

        let mut resolved = 0;
        for entry in entries {
            let node = self.with_internals(|internals| {
                let by_name = || {
                    entry
                        .file
                        .file_name()
                        .and_then(|name| internals.tree.find_by_filename(&name.to_string_lossy()))
                };
                Ok(internals.tree.find_by_path(&entry.file).or_else(by_name))
            })?;
            let (Some(node), Some(line_index)) = (node, entry.line.checked_sub(1)) else {
                tracing::debug!(%symbol, file = %entry.file.display(), line = entry.line, "skipping unresolvable match");
                continue;
            };
            self.add_breakpoint(node, line_index as usize)?;
            resolved += 1;
        }

        if resolved == 0 {
            return Err(SessionError::NotFound(format!(
                "no source file of {symbol} is in the target"
            )));
        }
        Ok(())
    }

    /// Load the file behind `node` and mark it as shown
    pub fn open_file(&self, node: NodeId) -> Result<(), SessionError> {
        self.with_internals(|internals| {
            loaded_file(internals, node)?;
            internals.tree.set_open(node, true);
            Ok(())
        })
    }

    pub fn close_file(&self, node: NodeId) -> Result<(), SessionError> {
        self.with_internals(|internals| {
            if internals.tree.node(node).is_none() {
                return Err(SessionError::NotFound(format!("no source node {}", node.index())));
            }
            internals.tree.set_open(node, false);
            Ok(())
        })
    }

    /// Flag the file at `path` to be brought to the front once it is open
    pub fn request_switch(&self, path: &Path) -> Result<NodeId, SessionError> {
        self.with_internals(|internals| {
            let node = internals.tree.find_by_path(path).ok_or_else(|| {
                SessionError::NotFound(format!("{} is not a source file of the target", path.display()))
            })?;
            internals.tree.request_switch(node);
            Ok(node)
        })
    }

    /// An open file flagged by [`DebugSession::request_switch`], clearing its flag
    ///
    /// Files flagged before they are opened stay flagged until they are.
    pub fn take_switch(&self) -> Result<Option<NodeId>, SessionError> {
        self.with_internals(|internals| {
            let open: Vec<NodeId> = internals
                .tree
                .depth_first()
                .filter(|&id| internals.tree.node(id).is_some_and(|node| node.is_open()))
                .collect();
            Ok(open.into_iter().find(|&id| internals.tree.take_switch(id)))
        })
    }

    /// Channel of [`Event`]s for the UI, in the order they happened
    pub fn events(&self) -> crossbeam_channel::Receiver<Event> {
        self.rx.clone()
    }

    /// Queue an event for the UI loop, as widgets do for the step buttons
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// State last reported by the event thread
    pub fn state(&self) -> ProcessState {
        self.with_internals(|internals| Ok(internals.state))
            .unwrap_or(ProcessState::Crashed)
    }

    pub fn active_location(&self) -> Option<Location> {
        self.with_internals(|internals| Ok(internals.active_location.clone()))
            .ok()
            .flatten()
    }

    pub fn target(&self) -> Option<Target> {
        self.with_internals(|internals| Ok(internals.target.clone()))
            .ok()
            .flatten()
    }

    pub fn breakpoints(&self) -> Vec<BreakpointRecord> {
        self.with_internals(|internals| Ok(internals.ledger.values().cloned().collect()))
            .unwrap_or_default()
    }

    /// Output the debuggee has written during the current launch
    pub fn console(&self) -> String {
        self.console.snapshot()
    }

    /// Source files the debug info names that could not be read
    pub fn missing_files(&self) -> Vec<PathBuf> {
        self.with_internals(|internals| Ok(internals.missing_files.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Whether execution is stopped at this line of `node`
    pub fn is_active_line(&self, node: NodeId, line_index: usize) -> bool {
        self.with_internals(|internals| {
            let Some(active) = &internals.active_location else {
                return Ok(false);
            };
            Ok(internals.tree.node(node).is_some()
                && internals.tree.find_by_path(&active.path) == Some(node)
                && active.line as usize == line_index + 1)
        })
        .unwrap_or(false)
    }

    pub fn has_breakpoint(&self, node: NodeId, line_index: usize) -> bool {
        self.with_internals(|internals| {
            Ok(internals
                .tree
                .node(node)
                .and_then(|node| node.line(line_index))
                .is_some_and(|line| line.breakpoint.is_some()))
        })
        .unwrap_or(false)
    }

    /// Read access to the source tree
    pub fn with_tree<F, T>(&self, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(&SourceTree) -> T,
    {
        self.with_internals(|internals| Ok(f(&internals.tree)))
    }

    fn ensure_stopped(&self) -> Result<(), SessionError> {
        match self.state() {
            ProcessState::Stopped => Ok(()),
            state => {
                tracing::debug!(?state, "rejecting control request");
                Err(SessionError::NotStopped)
            }
        }
    }

    fn join_event_thread(&self) {
        let handle = self
            .event_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };
        match handle.join() {
            // dropping the relay removes the previous launch's files
            Ok(relay) => drop(relay),
            Err(_) => tracing::warn!("event thread panicked"),
        }
    }

    fn with_internals<F, T>(&self, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(&mut SessionInternals) -> Result<T, SessionError>,
    {
        with_internals(&self.internals, f)
    }
}

/// Path of the file behind `node`, loading its lines on first use
fn loaded_file(internals: &mut SessionInternals, node: NodeId) -> Result<PathBuf, SessionError> {
    if internals.tree.node(node).is_none() {
        return Err(SessionError::NotFound(format!("no source node {}", node.index())));
    }
    let path = internals.tree.path(node);
    if !internals.tree.load_from_disk(node) {
        internals.missing_files.insert(path.clone());
        return Err(SessionError::NotFound(format!(
            "{} not found on disk",
            path.display()
        )));
    }
    internals.missing_files.remove(&path);
    Ok(path)
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        tracing::debug!("dropping debug session");
        if let Err(e) = self.backend.kill() {
            tracing::warn!(error = %e, "failed to stop debuggee during drop");
        }
        self.shutdown.store(true, Ordering::SeqCst);
        self.join_event_thread();
    }
}
