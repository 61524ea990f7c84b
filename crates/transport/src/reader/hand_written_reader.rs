use std::io::{self, BufRead};
use std::time::Duration;

use eyre::WrapErr;
use serde::de::DeserializeOwned;

use crate::Reader;

pub struct HandWrittenReader<R> {
    input: R,
}

enum ReaderState {
    Header,
    Content,
}

impl<R> Reader<R> for HandWrittenReader<R>
where
    R: BufRead,
{
    fn new(input: R) -> Self {
        Self { input }
    }

    fn poll_message(&mut self) -> eyre::Result<Option<crate::Message>> {
        self.poll_value()
    }
}

impl<R> HandWrittenReader<R>
where
    R: BufRead,
{
    /// Read the next framed message and decode it as `T`
    ///
    /// Returns `Ok(None)` once the input is closed. `WouldBlock` from the
    /// underlying reader is retried after a short sleep.
    pub fn poll_value<T>(&mut self) -> eyre::Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let mut state = ReaderState::Header;
        let mut buffer = String::new();
        let mut content_length: usize = 0;

        loop {
            match self.input.read_line(&mut buffer) {
                Ok(read_size) => {
                    if read_size == 0 {
                        return Ok(None);
                    }

                    match state {
                        ReaderState::Header => {
                            let line = buffer.trim_end();
                            if line.is_empty() {
                                buffer.clear();
                                continue;
                            }
                            let (name, value) = line.split_once(':').unwrap_or((line, ""));
                            match name {
                                "Content-Length" => {
                                    content_length = match value.trim().parse() {
                                        Ok(val) => val,
                                        Err(_) => {
                                            eyre::bail!("failed to parse content length")
                                        }
                                    };
                                    buffer.clear();
                                    buffer.reserve(content_length);
                                    state = ReaderState::Content;
                                }
                                other => {
                                    eyre::bail!("header {} not implemented", other);
                                }
                            }
                        }
                        ReaderState::Content => {
                            buffer.clear();
                            let mut content = vec![0; content_length];
                            self.input
                                .read_exact(content.as_mut_slice())
                                .map_err(|e| eyre::eyre!("failed to read: {:?}", e))?;
                            let content =
                                std::str::from_utf8(content.as_slice()).context("invalid utf8")?;
                            tracing::debug!(content, "received raw message");
                            let message = serde_json::from_str(content).with_context(|| {
                                format!("could not construct message from: {content}")
                            })?;
                            return Ok(Some(message));
                        }
                    }
                }
                Err(e) => {
                    if e.kind() == io::ErrorKind::WouldBlock {
                        std::thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                    return Err(eyre::eyre!("error reading from buffer: {e:?}"));
                }
            }
        }
    }
}
