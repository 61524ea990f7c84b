//! User configuration for the front-end
//!
//! Read from `config.toml` in the platform config directory
//! (`~/.config/lldb-frontend/config.toml` on Linux). Every key is optional; a
//! missing file gives the defaults.

use std::{
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};

use eyre::Context;
use serde::Deserialize;

const APPLICATION_DIR: &str = "lldb-frontend";
const FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Debug adapter binary, a name looked up on `PATH` or a path
    pub adapter: PathBuf,
    /// Upper bound on each wait for a backend event
    pub poll_interval_ms: u64,
    /// Most bytes of each redirected stream relayed per event loop turn
    pub drain_chunk_bytes: usize,
    pub stop_on_entry: bool,
    /// Working directory of the debuggee, defaults to ours
    pub working_directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter: PathBuf::from("lldb-dap"),
            poll_interval_ms: 50,
            drain_chunk_bytes: 64 * 1024,
            stop_on_entry: false,
            working_directory: None,
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Where the config file lives when none is given on the command line
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APPLICATION_DIR).join(FILE_NAME))
}

pub fn load(mut r: impl Read) -> eyre::Result<Config> {
    let mut contents = String::new();
    r.read_to_string(&mut contents)
        .wrap_err("reading configuration contents")?;
    from_str(&contents)
}

pub fn from_str(contents: &str) -> eyre::Result<Config> {
    let config = toml::from_str(contents).wrap_err("parsing configuration")?;
    Ok(config)
}

/// Load the config at `path`, or at [`default_path`] when `path` is `None`
///
/// An explicitly given file must exist. The default file is optional.
pub fn load_from(path: Option<&Path>) -> eyre::Result<Config> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_path() {
            Some(path) => (path, false),
            None => {
                tracing::debug!("no config directory on this platform, using defaults");
                return Ok(Config::default());
            }
        },
    };

    let span = tracing::debug_span!("load_config", config_path = %path.display());
    let _guard = span.enter();

    match std::fs::File::open(&path) {
        Ok(f) => {
            let config = load(f).wrap_err_with(|| format!("loading {}", path.display()))?;
            tracing::debug!(?config, "config loaded");
            Ok(config)
        }
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no config file, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e).wrap_err_with(|| format!("opening {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.adapter, PathBuf::from("lldb-dap"));
    }

    #[test]
    fn keys_override_defaults() {
        let config = from_str(
            r#"
            adapter = "/opt/llvm/bin/lldb-dap"
            poll_interval_ms = 10
            stop_on_entry = true
            working_directory = "/tmp/work"
            "#,
        )
        .unwrap();

        assert_eq!(config.adapter, PathBuf::from("/opt/llvm/bin/lldb-dap"));
        assert_eq!(config.poll_interval_ms, 10);
        assert_eq!(config.drain_chunk_bytes, 64 * 1024);
        assert!(config.stop_on_entry);
        assert_eq!(config.working_directory, Some(PathBuf::from("/tmp/work")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(from_str("adaptor = \"lldb\"").is_err());
    }

    #[test]
    fn explicit_file_is_loaded() -> eyre::Result<()> {
        let mut f = tempfile::NamedTempFile::new()?;
        writeln!(f, "drain_chunk_bytes = 128")?;

        let config = load_from(Some(f.path()))?;
        assert_eq!(config.drain_chunk_bytes, 128);
        Ok(())
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
