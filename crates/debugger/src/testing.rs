//! Scripted [`DebuggerBackend`] for tests
//!
//! [`FakeBackend`] answers every call from in-memory state and queues process
//! events the way a real debugger would report them: launching reports
//! `Running` and then stops at the first breakpoint (or exits when there is
//! none), continuing runs to exit, stepping stops again. Tests can push extra
//! events and read back the calls made.

use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use eyre::WrapErr;

use crate::backend::{BackendEvent, DebuggerBackend, LaunchRequest, StopReason, ThreadStop};
use crate::state::ProcessState;
use crate::types::{BreakpointId, CompileUnit, LineEntry, Location, Module, TargetInfo};

/// Thread id the fake reports stops on
pub const FAKE_THREAD_ID: i64 = 1;

/// A call received by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateTarget(PathBuf),
    Launch(LaunchRequest),
    Continue,
    StepInto,
    StepOver,
    Kill,
    CreateBreakpoint(Location),
    DeleteBreakpoint(BreakpointId),
    FindSymbol(String),
}

#[derive(Debug, Default)]
struct FakeState {
    compile_units: Vec<CompileUnit>,
    symbols: HashMap<String, Vec<LineEntry>>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    launch_error: Option<String>,
    hold_after_launch: bool,
    next_id: BreakpointId,
    breakpoints: BTreeMap<BreakpointId, Location>,
    calls: Vec<Call>,
    alive: bool,
}

pub struct FakeBackend {
    state: Mutex<FakeState>,
    tx: Sender<Result<BackendEvent, String>>,
    rx: Receiver<Result<BackendEvent, String>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            state: Mutex::new(FakeState::default()),
            tx,
            rx,
        }
    }

    pub fn with_compile_unit(self, directory: impl Into<PathBuf>, filename: &str) -> Self {
        self.lock()
            .compile_units
            .push(CompileUnit::new(directory, filename));
        self
    }

    /// Add a compile unit as the backend reports it, possibly incomplete
    pub fn with_raw_compile_unit(self, unit: CompileUnit) -> Self {
        self.lock().compile_units.push(unit);
        self
    }

    pub fn with_symbol(self, name: &str, file: impl Into<PathBuf>, line: u32) -> Self {
        self.lock()
            .symbols
            .entry(name.to_string())
            .or_default()
            .push(LineEntry {
                file: file.into(),
                line,
            });
        self
    }

    /// Bytes the "process" writes to its redirected streams on launch
    pub fn with_output(self, stdout: &[u8], stderr: &[u8]) -> Self {
        {
            let mut state = self.lock();
            state.stdout = stdout.to_vec();
            state.stderr = stderr.to_vec();
        }
        self
    }

    pub fn failing_launch(self, message: &str) -> Self {
        self.lock().launch_error = Some(message.to_string());
        self
    }

    /// Report only `Running` on launch and leave the rest to the test
    pub fn holding_after_launch(self) -> Self {
        self.lock().hold_after_launch = true;
        self
    }

    pub fn push_event(&self, event: BackendEvent) {
        let _ = self.tx.send(Ok(event));
    }

    /// Make the next wait fail
    pub fn push_wait_error(&self, message: &str) {
        let _ = self.tx.send(Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Breakpoints currently held, by id
    pub fn breakpoints(&self) -> Vec<(BreakpointId, Location)> {
        self.lock()
            .breakpoints
            .iter()
            .map(|(id, location)| (*id, location.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: Call) -> MutexGuard<'_, FakeState> {
        tracing::debug!(?call, "fake backend call");
        let mut state = self.lock();
        state.calls.push(call);
        state
    }

    fn require_alive(state: &FakeState) -> eyre::Result<()> {
        eyre::ensure!(state.alive, "process not launched");
        Ok(())
    }
}

fn write_redirect(path: &Path, bytes: &[u8]) -> eyre::Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("opening {}", path.display()))?;
    file.write_all(bytes)
        .wrap_err_with(|| format!("writing {}", path.display()))
}

impl DebuggerBackend for FakeBackend {
    fn create_target(&self, executable: &Path) -> eyre::Result<TargetInfo> {
        let state = self.record(Call::CreateTarget(executable.to_path_buf()));
        Ok(TargetInfo {
            executable: executable.to_path_buf(),
            modules: vec![Module {
                name: "fake".to_string(),
                compile_units: state.compile_units.clone(),
            }],
        })
    }

    fn launch(&self, request: &LaunchRequest) -> eyre::Result<()> {
        let mut state = self.record(Call::Launch(request.clone()));
        if let Some(message) = &state.launch_error {
            eyre::bail!("{message}");
        }

        write_redirect(&request.stdio.stdout, &state.stdout)?;
        write_redirect(&request.stdio.stderr, &state.stderr)?;
        state.alive = true;

        self.push_event(BackendEvent::state(ProcessState::Running));
        if state.hold_after_launch {
            return Ok(());
        }
        let first = state.breakpoints.keys().next().copied();
        match first {
            Some(id) => self.push_event(BackendEvent::stopped(vec![ThreadStop::new(
                FAKE_THREAD_ID,
                StopReason::Breakpoint { id },
            )])),
            None => {
                state.alive = false;
                self.push_event(BackendEvent::exited(Some(0)));
            }
        }
        Ok(())
    }

    fn continue_process(&self) -> eyre::Result<()> {
        let mut state = self.record(Call::Continue);
        Self::require_alive(&state)?;
        state.alive = false;
        self.push_event(BackendEvent::state(ProcessState::Running));
        self.push_event(BackendEvent::exited(Some(0)));
        Ok(())
    }

    fn step_into(&self) -> eyre::Result<()> {
        let state = self.record(Call::StepInto);
        Self::require_alive(&state)?;
        self.push_event(BackendEvent::state(ProcessState::Running));
        self.push_event(BackendEvent::stopped(vec![ThreadStop::new(
            FAKE_THREAD_ID,
            StopReason::Step,
        )]));
        Ok(())
    }

    fn step_over(&self) -> eyre::Result<()> {
        let state = self.record(Call::StepOver);
        Self::require_alive(&state)?;
        self.push_event(BackendEvent::state(ProcessState::Running));
        self.push_event(BackendEvent::stopped(vec![ThreadStop::new(
            FAKE_THREAD_ID,
            StopReason::Step,
        )]));
        Ok(())
    }

    fn kill(&self) -> eyre::Result<()> {
        let mut state = self.record(Call::Kill);
        if std::mem::take(&mut state.alive) {
            self.push_event(BackendEvent::exited(None));
        }
        Ok(())
    }

    fn create_breakpoint(&self, file: &Path, line: u32) -> eyre::Result<BreakpointId> {
        let location = Location::new(file, line);
        let mut state = self.record(Call::CreateBreakpoint(location.clone()));
        state.next_id += 1;
        let id = state.next_id;
        state.breakpoints.insert(id, location);
        Ok(id)
    }

    fn delete_breakpoint(&self, id: BreakpointId) -> eyre::Result<()> {
        let mut state = self.record(Call::DeleteBreakpoint(id));
        state
            .breakpoints
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| eyre::eyre!("no breakpoint with id {id}"))
    }

    fn find_symbol(&self, name: &str) -> eyre::Result<Vec<LineEntry>> {
        let state = self.record(Call::FindSymbol(name.to_string()));
        Ok(state.symbols.get(name).cloned().unwrap_or_default())
    }

    fn wait_for_event(&self, timeout: Duration) -> eyre::Result<Option<BackendEvent>> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(event)) => Ok(Some(event)),
            Ok(Err(message)) => Err(eyre::eyre!("{message}")),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                eyre::bail!("fake backend event queue disconnected")
            }
        }
    }
}
