//! Relay of the debuggee's redirected standard streams
//!
//! Each launch gets three scratch files the backend points the inferior's
//! stdin, stdout and stderr at. The event thread drains new output from the
//! two output files on every turn and forwards it as text.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use eyre::WrapErr;
use tempfile::NamedTempFile;

/// Paths the inferior's standard streams are redirected to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdioPaths {
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

/// A redirect file and how much of it has been relayed
struct Redirect {
    file: NamedTempFile,
    offset: u64,
    // bytes of a UTF-8 sequence cut off at the end of the last read
    partial: Vec<u8>,
}

impl Redirect {
    fn create(stream: &str) -> eyre::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(&format!("lldb_io_{stream}_"))
            .tempfile()
            .wrap_err_with(|| format!("creating {stream} redirect file"))?;
        tracing::debug!(path = %file.path().display(), "created redirect file");
        Ok(Self {
            file,
            offset: 0,
            partial: Vec::new(),
        })
    }

    fn path(&self) -> &Path {
        self.file.path()
    }

    /// Read at most `limit` new bytes and decode every complete character
    ///
    /// Also returns how many bytes were read from the file.
    fn read_new(&mut self, limit: usize) -> std::io::Result<(String, u64)> {
        let mut file = self.file.as_file();
        file.seek(SeekFrom::Start(self.offset))?;

        let mut bytes = std::mem::take(&mut self.partial);
        let before = bytes.len();
        file.take(limit as u64).read_to_end(&mut bytes)?;
        let read = (bytes.len() - before) as u64;
        self.offset += read;

        // hold back a trailing incomplete sequence for the next read
        let held = incomplete_tail(&bytes);
        self.partial = bytes.split_off(bytes.len() - held);
        Ok((String::from_utf8_lossy(&bytes).into_owned(), read))
    }

    /// Decode whatever is held back, used once the writer has gone
    fn flush_partial(&mut self) -> String {
        let partial = std::mem::take(&mut self.partial);
        String::from_utf8_lossy(&partial).into_owned()
    }
}

/// Length of a UTF-8 sequence cut short at the end of `bytes`
///
/// Invalid bytes earlier in the buffer do not matter; only the last three
/// bytes can start a sequence that the next read completes.
fn incomplete_tail(bytes: &[u8]) -> usize {
    (1..=bytes.len().min(3))
        .find(|&len| {
            matches!(
                std::str::from_utf8(&bytes[bytes.len() - len..]),
                Err(e) if e.valid_up_to() == 0 && e.error_len().is_none()
            )
        })
        .unwrap_or(0)
}

/// Scratch files for one launch plus read offsets
///
/// Dropping the relay deletes the files.
pub struct ProcessIORelay {
    streams: Option<[Redirect; 3]>,
    chunk: usize,
}

const STDIN: usize = 0;
const STDOUT: usize = 1;
const STDERR: usize = 2;

impl ProcessIORelay {
    /// A relay with no files yet, relaying at most `chunk` bytes per stream per drain
    pub fn new(chunk: usize) -> Self {
        Self {
            streams: None,
            chunk: chunk.max(1),
        }
    }

    /// Create fresh redirect files, deleting any held from before
    #[tracing::instrument(skip(self))]
    pub fn create(&mut self) -> eyre::Result<()> {
        self.close();
        self.streams = Some([
            Redirect::create("stdin")?,
            Redirect::create("stdout")?,
            Redirect::create("stderr")?,
        ]);
        Ok(())
    }

    pub fn paths(&self) -> Option<StdioPaths> {
        let streams = self.streams.as_ref()?;
        Some(StdioPaths {
            stdin: streams[STDIN].path().to_path_buf(),
            stdout: streams[STDOUT].path().to_path_buf(),
            stderr: streams[STDERR].path().to_path_buf(),
        })
    }

    /// Delete the redirect files
    pub fn close(&mut self) {
        if let Some(streams) = self.streams.take() {
            tracing::debug!(stdout = %streams[STDOUT].path().display(), "removing redirect files");
        }
    }

    /// New output since the last drain, stdout then stderr
    ///
    /// Reads at most the configured chunk from each stream. Empty streams are
    /// left out. Never blocks on the writer.
    pub fn drain(&mut self) -> Vec<String> {
        self.drain_counted().0
    }

    fn drain_counted(&mut self) -> (Vec<String>, u64) {
        let chunk = self.chunk;
        let Some(streams) = self.streams.as_mut() else {
            return (Vec::new(), 0);
        };

        let mut chunks = Vec::new();
        let mut total = 0;
        for index in [STDOUT, STDERR] {
            match streams[index].read_new(chunk) {
                Ok((text, read)) => {
                    total += read;
                    if !text.is_empty() {
                        chunks.push(text);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %streams[index].path().display(), "reading redirect file")
                }
            }
        }
        (chunks, total)
    }

    /// Relay everything left, once the process is gone
    pub fn drain_all(&mut self) -> Vec<String> {
        let mut chunks = Vec::new();
        loop {
            let (next, read) = self.drain_counted();
            chunks.extend(next);
            if read == 0 {
                break;
            }
        }
        if let Some(streams) = self.streams.as_mut() {
            for index in [STDOUT, STDERR] {
                let rest = streams[index].flush_partial();
                if !rest.is_empty() {
                    chunks.push(rest);
                }
            }
        }
        chunks
    }
}

impl Drop for ProcessIORelay {
    fn drop(&mut self) {
        self.close();
    }
}

/// Text the debuggee has written, shared between the event thread and the UI
#[derive(Debug, Clone, Default)]
pub struct ConsoleBuffer {
    text: Arc<Mutex<String>>,
}

impl ConsoleBuffer {
    pub fn append(&self, chunk: &str) {
        let mut text = self.text.lock().unwrap_or_else(|e| e.into_inner());
        text.push_str(chunk);
    }

    pub fn snapshot(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::Write;

    use super::*;

    fn append(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn drain_without_files_is_empty() {
        let mut relay = ProcessIORelay::new(16);
        assert!(relay.paths().is_none());
        assert!(relay.drain().is_empty());
    }

    #[test]
    fn drains_each_byte_once() {
        let mut relay = ProcessIORelay::new(1024);
        relay.create().unwrap();
        let paths = relay.paths().unwrap();

        append(&paths.stdout, b"hello ");
        assert_eq!(relay.drain(), vec!["hello ".to_string()]);
        assert!(relay.drain().is_empty());

        append(&paths.stdout, b"world\n");
        append(&paths.stderr, b"oops\n");
        assert_eq!(relay.drain(), vec!["world\n".to_string(), "oops\n".to_string()]);
    }

    #[test]
    fn chunked_drain_concatenates_to_everything_written() {
        let mut relay = ProcessIORelay::new(3);
        relay.create().unwrap();
        let paths = relay.paths().unwrap();

        let written = "naïve café ünïcode output\nsecond line\n";
        append(&paths.stdout, written.as_bytes());

        let mut relayed = String::new();
        loop {
            let chunks = relay.drain();
            if chunks.is_empty() {
                break;
            }
            relayed.extend(chunks);
        }
        relayed.extend(relay.drain_all());
        assert_eq!(relayed, written);
    }

    #[test]
    fn split_characters_survive_earlier_invalid_bytes() {
        let mut relay = ProcessIORelay::new(4);
        relay.create().unwrap();
        let paths = relay.paths().unwrap();

        // a stray byte, then "é" cut by the chunk boundary
        append(&paths.stdout, b"\xffab\xc3\xa9z");
        assert_eq!(relay.drain(), vec!["\u{FFFD}ab".to_string()]);
        assert_eq!(relay.drain(), vec!["éz".to_string()]);
    }

    #[test]
    fn incomplete_tails_are_measured_from_the_end() {
        assert_eq!(incomplete_tail(b""), 0);
        assert_eq!(incomplete_tail(b"plain"), 0);
        assert_eq!(incomplete_tail("é".as_bytes()), 0);
        assert_eq!(incomplete_tail(b"\xffx\xe2\x82"), 2);
        assert_eq!(incomplete_tail(b"ok\xf0\x9f\x98"), 3);
        assert_eq!(incomplete_tail(b"bad\x80"), 0);
    }

    #[test]
    fn final_drain_collects_the_rest() {
        let mut relay = ProcessIORelay::new(4);
        relay.create().unwrap();
        let paths = relay.paths().unwrap();

        append(&paths.stdout, b"0123456789");
        append(&paths.stderr, b"abcdef");
        let first = relay.drain();
        assert_eq!(first, vec!["0123".to_string(), "abcd".to_string()]);

        let rest: String = relay.drain_all().concat();
        assert_eq!(rest.len(), 8);
        assert!(rest.contains("4567") && rest.contains("89") && rest.contains("ef"));
    }

    #[test]
    fn create_replaces_previous_files() {
        let mut relay = ProcessIORelay::new(64);
        relay.create().unwrap();
        let old = relay.paths().unwrap();

        relay.create().unwrap();
        let new = relay.paths().unwrap();
        assert_ne!(old, new);
        assert!(!old.stdout.exists());
        assert!(!old.stdin.exists());
        assert!(new.stdout.exists());
    }

    #[test]
    fn dropping_removes_files() {
        let mut relay = ProcessIORelay::new(64);
        relay.create().unwrap();
        let paths = relay.paths().unwrap();
        assert!(paths.stderr.exists());

        drop(relay);
        assert!(!paths.stdin.exists());
        assert!(!paths.stdout.exists());
        assert!(!paths.stderr.exists());
    }

    #[test]
    fn console_buffer_is_shared() {
        let console = ConsoleBuffer::default();
        let writer = console.clone();
        writer.append("a");
        writer.append("b");
        assert_eq!(console.snapshot(), "ab");
        console.clear();
        assert_eq!(writer.snapshot(), "");
    }
}
