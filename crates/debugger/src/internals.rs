use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use eyre::WrapErr;
use source_tree::SourceTree;

use crate::backend::{BackendEvent, DebuggerBackend, StopReason};
use crate::error::SessionError;
use crate::io_relay::{ConsoleBuffer, ProcessIORelay};
use crate::state::{Event, ProcessState};
use crate::types::{BreakpointId, BreakpointRecord, Location, Target};

/// State shared by the UI thread and the event thread
#[derive(Debug, Default)]
pub(crate) struct SessionInternals {
    pub(crate) tree: SourceTree,
    pub(crate) ledger: BTreeMap<BreakpointId, BreakpointRecord>,
    /// Where the process last stopped at a breakpoint, until it resumes
    pub(crate) active_location: Option<Location>,
    pub(crate) state: ProcessState,
    pub(crate) target: Option<Target>,
    pub(crate) missing_files: BTreeSet<PathBuf>,
}

pub(crate) fn with_internals<F, T>(
    internals: &Mutex<SessionInternals>,
    f: F,
) -> Result<T, SessionError>
where
    F: FnOnce(&mut SessionInternals) -> Result<T, SessionError>,
{
    tracing::trace!(poisoned = %internals.is_poisoned(), "trying to lock internals");
    let mut guard = internals
        .lock()
        .map_err(|e| SessionError::InvalidState(format!("session mutex poisoned: {e}")))?;
    tracing::trace!("executing operation");
    let res = f(&mut guard);
    drop(guard);
    tracing::trace!("unlocked internals");
    res
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Finish,
}

/// Body of the per-launch event thread
///
/// Relays process output, waits on the backend and turns what it reports
/// into [`Event`]s for the UI. Ends when the process is gone or the session
/// asks it to, handing the relay back so its files outlive the thread.
pub(crate) struct EventBridge {
    pub(crate) backend: Arc<dyn DebuggerBackend>,
    pub(crate) internals: Arc<Mutex<SessionInternals>>,
    pub(crate) publisher: crossbeam_channel::Sender<Event>,
    pub(crate) console: ConsoleBuffer,
    pub(crate) relay: ProcessIORelay,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) poll_interval: Duration,
}

impl EventBridge {
    pub(crate) fn spawn(self) -> eyre::Result<JoinHandle<ProcessIORelay>> {
        thread::Builder::new()
            .name("debug-events".to_string())
            .spawn(move || self.run())
            .wrap_err("spawning event thread")
    }

    fn run(mut self) -> ProcessIORelay {
        tracing::debug!("event thread started");
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                tracing::debug!("shutdown requested");
                break;
            }

            let chunks = self.relay.drain();
            self.relay_output(chunks);

            match self.backend.wait_for_event(self.poll_interval) {
                Ok(Some(event)) => {
                    if self.on_event(event) == Flow::Finish {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "waiting for backend event failed");
                    self.set_terminal(ProcessState::Crashed);
                    break;
                }
            }
        }

        let chunks = self.relay.drain_all();
        self.relay_output(chunks);
        tracing::debug!("event thread finished");
        self.relay
    }

    fn relay_output(&self, chunks: Vec<String>) {
        for chunk in chunks {
            self.console.append(&chunk);
            self.publish(Event::Io(chunk));
        }
    }

    fn publish(&self, event: Event) {
        if let Err(e) = self.publisher.send(event) {
            tracing::debug!(error = %e, "no receiver for event");
        }
    }

    #[tracing::instrument(skip(self))]
    fn on_event(&self, event: BackendEvent) -> Flow {
        let (state, threads, exit_code) = match event {
            BackendEvent::State {
                state,
                threads,
                exit_code,
            } => (state, threads, exit_code),
            BackendEvent::Console(text) => {
                tracing::debug!(%text, "debugger output");
                return Flow::Continue;
            }
        };

        match state {
            ProcessState::Running => {
                self.update(|internals| {
                    internals.active_location = None;
                    internals.state = ProcessState::Running;
                });
                Flow::Continue
            }
            ProcessState::Stopped => {
                self.update(|internals| internals.state = ProcessState::Stopped);
                for thread in threads.iter().filter(|thread| thread.is_valid()) {
                    match &thread.reason {
                        StopReason::Breakpoint { id } => self.on_breakpoint(*id),
                        StopReason::None => {}
                        other => {
                            tracing::debug!(thread_id = thread.thread_id, reason = ?other, "thread stopped")
                        }
                    }
                }
                Flow::Continue
            }
            state if state.is_terminal() => {
                tracing::info!(?state, ?exit_code, "process ended");
                self.set_terminal(state);
                Flow::Finish
            }
            other => {
                tracing::debug!(state = ?other, "ignoring lifecycle state");
                Flow::Continue
            }
        }
    }

    fn on_breakpoint(&self, id: BreakpointId) {
        let hit = with_internals(&self.internals, |internals| {
            let record = internals
                .ledger
                .get(&id)
                .ok_or_else(|| SessionError::NotFound(format!("breakpoint {id} is not known")))?;
            let location = record.location.clone();
            internals.active_location = Some(location.clone());
            let node = internals.tree.find_by_path(&location.path);
            let open = node
                .and_then(|node| internals.tree.node(node))
                .is_some_and(|node| node.is_open());
            Ok((location, node, open))
        });

        match hit {
            Ok((location, node, open)) => {
                tracing::info!(%location, "stopped at breakpoint");
                self.publish(Event::SwitchToFile(location.path));
                if let (Some(node), false) = (node, open) {
                    self.publish(Event::LoadFile(node));
                }
            }
            Err(e) => tracing::warn!(error = %e, id, "cannot resolve breakpoint hit"),
        }
    }

    fn set_terminal(&self, state: ProcessState) {
        self.update(|internals| {
            internals.active_location = None;
            internals.state = state;
        });
    }

    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionInternals),
    {
        if let Err(e) = with_internals(&self.internals, |internals| {
            f(internals);
            Ok(())
        }) {
            tracing::warn!(error = %e, "updating session state");
        }
    }
}
