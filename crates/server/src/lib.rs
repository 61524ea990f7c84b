//! Management of the `lldb-dap` adapter process
use std::{
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    thread,
};

use eyre::WrapErr;
use transport::StdioTransport;

pub type AdapterTransport = StdioTransport<ChildStdout, ChildStdin>;

/// Find the adapter binary
///
/// Anything containing a path separator is taken as a path and must exist;
/// a bare name is looked up on `PATH`.
pub fn resolve_adapter(adapter: &Path) -> eyre::Result<PathBuf> {
    if adapter.components().count() > 1 {
        if adapter.is_file() {
            return Ok(adapter.to_path_buf());
        }
        eyre::bail!("debug adapter {} does not exist", adapter.display());
    }

    which::which(adapter).map_err(|_| {
        eyre::eyre!(
            "{} not found in PATH. Install LLDB (which ships lldb-dap) or set `adapter` in the config file",
            adapter.display()
        )
    })
}

/// Forward each line the adapter writes on stderr to the log
fn forward_stderr(reader: impl Read + Send + 'static) -> eyre::Result<()> {
    thread::Builder::new()
        .name("adapter-stderr".to_string())
        .spawn(move || {
            let reader = BufReader::new(reader);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                tracing::debug!(%line, "adapter stderr");
            }
        })
        .wrap_err("spawning stderr forwarder")?;
    Ok(())
}

/// A running adapter process speaking DAP on its stdio
pub struct LldbDapServer {
    child: Option<Child>,
}

impl LldbDapServer {
    /// Spawn the adapter and hand back the transport over its pipes
    #[tracing::instrument]
    pub fn spawn(adapter: &Path) -> eyre::Result<(Self, AdapterTransport)> {
        let adapter = resolve_adapter(adapter)?;

        tracing::debug!(adapter = %adapter.display(), "starting adapter process");
        let mut child = Command::new(&adapter)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .wrap_err_with(|| format!("spawning {}", adapter.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| eyre::eyre!("adapter stdout was not captured"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| eyre::eyre!("adapter stdin was not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr)?;
        }

        tracing::debug!(pid = child.id(), "adapter started");
        Ok((Self { child: Some(child) }, StdioTransport::new(stdout, stdin)))
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Kill the adapter and reap it; later calls do nothing
    pub fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        tracing::debug!("terminating adapter");
        if let Err(e) = child.kill() {
            // already exited after disconnect
            tracing::debug!(error = %e, "could not kill adapter process");
        }
        match child.wait() {
            Ok(status) => tracing::debug!(%status, "adapter terminated"),
            Err(e) => tracing::warn!(error = %e, "could not reap adapter process"),
        }
    }
}

impl Drop for LldbDapServer {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use std::io::IsTerminal;

    use serde_json::json;
    use transport::{DapTransport, Message, Reader, events, write_frame};

    use super::*;

    #[ctor::ctor]
    fn init() {
        let in_ci = std::env::var("CI")
            .map(|val| val == "true")
            .unwrap_or(false);

        if std::io::stderr().is_terminal() || in_ci {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init();
        } else {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .json()
                .try_init();
        }
        let _ = color_eyre::install();
    }

    #[test]
    fn missing_adapter_on_path_is_reported() {
        let err = resolve_adapter(Path::new("definitely-not-an-adapter-binary")).unwrap_err();
        assert!(err.to_string().contains("not found in PATH"), "{err}");
    }

    #[test]
    fn missing_adapter_path_is_reported() {
        let err = resolve_adapter(Path::new("/nonexistent/bin/lldb-dap")).unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");
    }

    #[test]
    fn frames_cross_the_child_pipes() -> eyre::Result<()> {
        // `cat` echoes stdin to stdout, so whatever we write comes back framed
        let (mut server, transport) = LldbDapServer::spawn(Path::new("cat"))?;
        let (reader, mut writer) = transport.split()?;
        let mut reader = transport::reader::get(reader);

        write_frame(
            &mut writer,
            &json!({"seq": 1, "type": "event", "event": "terminated"}),
        )?;
        let message = reader.poll_message()?;
        assert!(matches!(
            message,
            Some(Message::Event(events::Event::Terminated))
        ));

        server.terminate();
        assert!(server.id().is_none());
        server.terminate();
        Ok(())
    }
}
