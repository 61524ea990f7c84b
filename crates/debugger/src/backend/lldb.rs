//! Native backend: DWARF for target inspection, `lldb-dap` for process control

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use eyre::WrapErr;
use server::LldbDapServer;
use transport::{
    Client, DapTransport,
    events::{self, StoppedEventBody},
    requests::{self, RequestBody},
    responses::{self, ResponseBody},
    types::{Source, SourceBreakpoint},
};

use super::{BackendEvent, DebugInfo, DebuggerBackend, LaunchRequest, StopReason, ThreadStop};
use crate::state::ProcessState;
use crate::types::{BreakpointId, LineEntry, Module, TargetInfo};

#[derive(Debug, Clone)]
pub struct LldbBackendOptions {
    /// `lldb-dap` binary, name or path
    pub adapter: PathBuf,
    /// Bound on each step of the launch handshake
    pub handshake_timeout: Duration,
}

impl Default for LldbBackendOptions {
    fn default() -> Self {
        Self {
            adapter: PathBuf::from("lldb-dap"),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Breakpoints by file, with the ids the adapter gave them
///
/// The adapter replaces all breakpoints of a file on every `setBreakpoints`,
/// so ids here are ours and stay stable across those round trips.
#[derive(Debug, Default)]
struct BreakpointTable {
    next_id: BreakpointId,
    by_file: BTreeMap<PathBuf, Vec<(BreakpointId, u32)>>,
    adapter_ids: HashMap<i64, BreakpointId>,
}

impl BreakpointTable {
    fn insert(&mut self, file: &Path, line: u32) -> BreakpointId {
        self.next_id += 1;
        let id = self.next_id;
        self.by_file
            .entry(file.to_path_buf())
            .or_default()
            .push((id, line));
        id
    }

    /// Forget `id`, returning the file it was in
    fn remove(&mut self, id: BreakpointId) -> Option<PathBuf> {
        let file = self
            .by_file
            .iter()
            .find(|(_, entries)| entries.iter().any(|(existing, _)| *existing == id))
            .map(|(file, _)| file.clone())?;
        if let Some(entries) = self.by_file.get_mut(&file) {
            entries.retain(|(existing, _)| *existing != id);
        }
        self.adapter_ids.retain(|_, ours| *ours != id);
        Some(file)
    }

    fn entries(&self, file: &Path) -> Vec<(BreakpointId, u32)> {
        self.by_file.get(file).cloned().unwrap_or_default()
    }

    fn files(&self) -> Vec<PathBuf> {
        self.by_file
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(file, _)| file.clone())
            .collect()
    }

    /// Pair the adapter's answer with the entries it was sent, in order
    fn record_adapter_ids(
        &mut self,
        sent: &[(BreakpointId, u32)],
        reported: &[transport::types::Breakpoint],
    ) {
        for ((ours, line), breakpoint) in sent.iter().zip(reported) {
            match breakpoint.id {
                Some(adapter_id) => {
                    self.adapter_ids.insert(adapter_id, *ours);
                }
                None => tracing::debug!(id = ours, line, "adapter did not assign an id"),
            }
            if !breakpoint.verified {
                tracing::debug!(id = ours, line, message = ?breakpoint.message, "breakpoint not resolved yet");
            }
        }
    }

    fn translate(&self, adapter_id: i64) -> Option<BreakpointId> {
        self.adapter_ids.get(&adapter_id).copied()
    }
}

/// Events read from the adapter, waiting to be handed to the session
struct EventSource {
    rx: Receiver<events::Event>,
    pending: VecDeque<events::Event>,
    exited: bool,
    finished: bool,
}

struct AdapterSession {
    client: Client,
    server: Option<LldbDapServer>,
}

pub struct LldbBackend {
    options: LldbBackendOptions,
    debug_info: Mutex<Option<DebugInfo>>,
    breakpoints: Mutex<BreakpointTable>,
    session: Mutex<Option<AdapterSession>>,
    events: Mutex<Option<EventSource>>,
    selected_thread: Mutex<Option<i64>>,
}

fn lock<'a, T>(name: &str, mutex: &'a Mutex<T>) -> eyre::Result<MutexGuard<'a, T>> {
    tracing::trace!(%name, "taking lock");
    mutex
        .lock()
        .map_err(|e| eyre::eyre!("{name} mutex poisoned: {e}"))
}

impl LldbBackend {
    /// Check the adapter can be found and build an idle backend
    pub fn new(options: LldbBackendOptions) -> eyre::Result<Self> {
        let adapter = server::resolve_adapter(&options.adapter).wrap_err("locating lldb-dap")?;
        tracing::debug!(adapter = %adapter.display(), "using debug adapter");
        Ok(Self::with_options(LldbBackendOptions {
            adapter,
            ..options
        }))
    }

    fn with_options(options: LldbBackendOptions) -> Self {
        Self {
            options,
            debug_info: Mutex::new(None),
            breakpoints: Mutex::new(BreakpointTable::default()),
            session: Mutex::new(None),
            events: Mutex::new(None),
            selected_thread: Mutex::new(None),
        }
    }

    /// Client of the running adapter, if there is one
    fn client(&self) -> eyre::Result<Option<Client>> {
        Ok(lock("session", &self.session)?
            .as_ref()
            .map(|session| session.client.clone()))
    }

    fn running_client(&self) -> eyre::Result<Client> {
        self.client()?
            .ok_or_else(|| eyre::eyre!("no process is being debugged"))
    }

    fn selected_thread(&self) -> eyre::Result<i64> {
        lock("selected_thread", &self.selected_thread)?
            .ok_or_else(|| eyre::eyre!("logic error: no current thread id"))
    }

    /// Send the full breakpoint list of `file` and record the adapter's ids
    fn sync_file(&self, client: &Client, file: &Path) -> eyre::Result<()> {
        let sent = lock("breakpoints", &self.breakpoints)?.entries(file);
        let response = client
            .send(RequestBody::SetBreakpoints(requests::SetBreakpoints {
                source: Source {
                    name: file
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned()),
                    path: Some(file.display().to_string()),
                },
                breakpoints: sent
                    .iter()
                    .map(|(_, line)| SourceBreakpoint { line: i64::from(*line) })
                    .collect(),
            }))
            .wrap_err("sending setBreakpoints")?
            .into_result()
            .wrap_err_with(|| format!("setting breakpoints in {}", file.display()))?;

        if let Some(ResponseBody::SetBreakpoints(responses::SetBreakpoints { breakpoints })) =
            response.body
        {
            lock("breakpoints", &self.breakpoints)?.record_adapter_ids(&sent, &breakpoints);
        }
        Ok(())
    }

    /// Run the DAP launch sequence over `transport`
    ///
    /// initialize, launch, wait for `initialized`, breakpoints,
    /// configurationDone, then the launch response. Events seen along the way
    /// are kept for [`DebuggerBackend::wait_for_event`].
    fn launch_over<T>(
        &self,
        transport: T,
        server: Option<LldbDapServer>,
        request: &LaunchRequest,
    ) -> eyre::Result<()>
    where
        T: DapTransport,
    {
        let timeout = self.options.handshake_timeout;
        let (tx, rx) = crossbeam_channel::unbounded();
        let client = Client::with_transport(transport, tx).wrap_err("creating DAP client")?;

        client
            .request(RequestBody::Initialize(requests::Initialize::default()))?
            .wait(timeout)
            .wrap_err("initializing adapter")?
            .into_result()?;

        let launch = client.request(RequestBody::Launch(requests::Launch {
            program: request.executable.display().to_string(),
            args: request.args.clone(),
            cwd: request
                .working_directory
                .as_ref()
                .map(|dir| dir.display().to_string()),
            stdio: vec![
                Some(request.stdio.stdin.display().to_string()),
                Some(request.stdio.stdout.display().to_string()),
                Some(request.stdio.stderr.display().to_string()),
            ],
            stop_on_entry: request.stop_on_entry,
        }))?;

        let mut pending = VecDeque::new();
        let mut launch_response = None;
        let deadline = Instant::now() + timeout;
        loop {
            if launch_response.is_none() {
                launch_response = launch.try_take()?;
                if let Some(response) = &launch_response {
                    if !response.success {
                        eyre::bail!(
                            "launching {}: {}",
                            request.executable.display(),
                            response.message.as_deref().unwrap_or("no message")
                        );
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                eyre::bail!("adapter did not send `initialized` within {timeout:?}");
            }
            match rx.recv_timeout(remaining.min(Duration::from_millis(50))) {
                Ok(events::Event::Initialized) => break,
                Ok(other) => pending.push_back(other),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    eyre::bail!("adapter exited during launch")
                }
            }
        }

        let files = lock("breakpoints", &self.breakpoints)?.files();
        for file in files {
            self.sync_file(&client, &file)?;
        }

        client
            .request(RequestBody::ConfigurationDone)?
            .wait(timeout)
            .wrap_err("finishing configuration")?
            .into_result()?;

        let response = match launch_response {
            Some(response) => response,
            None => launch.wait(timeout).wrap_err("waiting for launch")?,
        };
        response
            .into_result()
            .wrap_err_with(|| format!("launching {}", request.executable.display()))?;

        *lock("selected_thread", &self.selected_thread)? = None;
        *lock("events", &self.events)? = Some(EventSource {
            rx,
            pending,
            exited: false,
            finished: false,
        });
        *lock("session", &self.session)? = Some(AdapterSession { client, server });
        Ok(())
    }

    fn stop_reason(&self, body: &StoppedEventBody) -> eyre::Result<StopReason> {
        let detail = || {
            body.description
                .clone()
                .or_else(|| body.text.clone())
                .unwrap_or_else(|| body.reason.clone())
        };
        let reason = match body.reason.as_str() {
            "breakpoint" => {
                let table = lock("breakpoints", &self.breakpoints)?;
                match body
                    .hit_breakpoint_ids
                    .iter()
                    .flatten()
                    .find_map(|adapter_id| table.translate(*adapter_id))
                {
                    Some(id) => StopReason::Breakpoint { id },
                    None => StopReason::Other(detail()),
                }
            }
            "step" => StopReason::Step,
            "signal" => StopReason::Signal(detail()),
            "exception" => StopReason::Exception(detail()),
            _ => StopReason::Other(detail()),
        };
        Ok(reason)
    }

    fn translate(
        &self,
        event: events::Event,
        source: &mut EventSource,
    ) -> eyre::Result<Option<BackendEvent>> {
        let translated = match event {
            events::Event::Stopped(body) => {
                let thread_id = body.thread_id.unwrap_or_default();
                if thread_id > 0 {
                    *lock("selected_thread", &self.selected_thread)? = Some(thread_id);
                }
                let reason = self.stop_reason(&body)?;
                Some(BackendEvent::stopped(vec![ThreadStop::new(thread_id, reason)]))
            }
            events::Event::Continued(_) | events::Event::Process(_) => {
                Some(BackendEvent::state(ProcessState::Running))
            }
            events::Event::Exited(body) => {
                source.exited = true;
                Some(BackendEvent::exited(Some(body.exit_code)))
            }
            events::Event::Terminated => {
                if source.exited {
                    None
                } else {
                    source.exited = true;
                    Some(BackendEvent::state(ProcessState::Crashed))
                }
            }
            events::Event::Output(body) => Some(BackendEvent::Console(body.output)),
            other => {
                tracing::trace!(event = ?other, "ignoring adapter event");
                None
            }
        };
        Ok(translated)
    }
}

impl DebuggerBackend for LldbBackend {
    #[tracing::instrument(skip(self))]
    fn create_target(&self, executable: &Path) -> eyre::Result<TargetInfo> {
        let info = DebugInfo::load(executable)
            .wrap_err_with(|| format!("reading debug info of {}", executable.display()))?;
        let name = executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| executable.display().to_string());
        let target = TargetInfo {
            executable: executable.to_path_buf(),
            modules: vec![Module {
                name,
                compile_units: info.compile_units().to_vec(),
            }],
        };
        *lock("debug_info", &self.debug_info)? = Some(info);
        Ok(target)
    }

    #[tracing::instrument(skip(self))]
    fn launch(&self, request: &LaunchRequest) -> eyre::Result<()> {
        if let Some(mut old) = lock("session", &self.session)?.take() {
            tracing::debug!("replacing previous adapter session");
            if let Some(server) = old.server.as_mut() {
                server.terminate();
            }
        }

        let (server, transport) =
            LldbDapServer::spawn(&self.options.adapter).wrap_err("starting lldb-dap")?;
        self.launch_over(transport, Some(server), request)
    }

    fn continue_process(&self) -> eyre::Result<()> {
        let client = self.running_client()?;
        let thread_id = self.selected_thread()?;
        client
            .send(RequestBody::Continue(requests::Continue {
                thread_id,
                single_thread: false,
            }))
            .wrap_err("sending continue request")?
            .into_result()?;
        Ok(())
    }

    fn step_into(&self) -> eyre::Result<()> {
        let client = self.running_client()?;
        let thread_id = self.selected_thread()?;
        client
            .send(RequestBody::StepIn(requests::StepIn { thread_id }))
            .wrap_err("sending step_in request")?
            .into_result()?;
        Ok(())
    }

    fn step_over(&self) -> eyre::Result<()> {
        let client = self.running_client()?;
        let thread_id = self.selected_thread()?;
        client
            .send(RequestBody::Next(requests::Next { thread_id }))
            .wrap_err("sending step_over request")?
            .into_result()?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn kill(&self) -> eyre::Result<()> {
        let Some(mut session) = lock("session", &self.session)?.take() else {
            return Ok(());
        };
        if let Err(e) = session
            .client
            .send(RequestBody::Disconnect(requests::Disconnect {
                terminate_debuggee: true,
            }))
            .and_then(|response| response.into_result())
        {
            tracing::warn!(error = %e, "failed to disconnect from adapter");
        }
        // the adapter closing its pipe ends the event stream
        if let Some(server) = session.server.as_mut() {
            server.terminate();
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn create_breakpoint(&self, file: &Path, line: u32) -> eyre::Result<BreakpointId> {
        let id = lock("breakpoints", &self.breakpoints)?.insert(file, line);
        if let Some(client) = self.client()? {
            if let Err(e) = self.sync_file(&client, file) {
                lock("breakpoints", &self.breakpoints)?.remove(id);
                return Err(e);
            }
        }
        Ok(id)
    }

    #[tracing::instrument(skip(self))]
    fn delete_breakpoint(&self, id: BreakpointId) -> eyre::Result<()> {
        let file = lock("breakpoints", &self.breakpoints)?
            .remove(id)
            .ok_or_else(|| eyre::eyre!("no breakpoint with id {id}"))?;
        if let Some(client) = self.client()? {
            self.sync_file(&client, &file)?;
        }
        Ok(())
    }

    fn find_symbol(&self, name: &str) -> eyre::Result<Vec<LineEntry>> {
        let info = lock("debug_info", &self.debug_info)?;
        let info = info
            .as_ref()
            .ok_or_else(|| eyre::eyre!("no target has been created"))?;
        Ok(info.find_function(name))
    }

    fn wait_for_event(&self, timeout: Duration) -> eyre::Result<Option<BackendEvent>> {
        let mut events = lock("events", &self.events)?;
        let listening = events.as_ref().is_some_and(|source| !source.finished);
        if !listening {
            drop(events);
            std::thread::sleep(timeout);
            return Ok(None);
        }
        let Some(source) = events.as_mut() else {
            return Ok(None);
        };

        let event = match source.pending.pop_front() {
            Some(event) => event,
            None => match source.rx.recv_timeout(timeout) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    source.finished = true;
                    if source.exited {
                        tracing::debug!("adapter closed after the process exited");
                        return Ok(None);
                    }
                    tracing::debug!("adapter closed without reporting an exit");
                    return Ok(Some(BackendEvent::state(ProcessState::Crashed)));
                }
            },
        };
        tracing::debug!(?event, "adapter event");
        self.translate(event, source)
    }
}

impl Drop for LldbBackend {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            tracing::warn!(error = %e, "failed to stop debuggee during drop");
        }
    }
}
