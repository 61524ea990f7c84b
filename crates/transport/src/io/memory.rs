//! In-memory transport for tests

use std::io::{self, BufRead, Cursor, Read, Write};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::DapTransport;

/// One end of a connected pair of in-memory pipes
///
/// ```
/// use transport::io::{DapTransport, InMemoryTransport};
///
/// let (client, adapter) = InMemoryTransport::pair();
/// let (_client_reader, _client_writer) = client.split()?;
/// let (_adapter_reader, _adapter_writer) = adapter.split()?;
/// # Ok::<(), eyre::Error>(())
/// ```
pub struct InMemoryTransport {
    reader: InMemoryReader,
    writer: InMemoryWriter,
}

/// Reader half; returns `WouldBlock` while the peer has written nothing new
/// and EOF once the peer's writer is dropped.
pub struct InMemoryReader {
    buffer: Cursor<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

pub struct InMemoryWriter {
    tx: Sender<Vec<u8>>,
}

impl InMemoryTransport {
    /// Returns `(client, adapter)`; bytes written to one are read from the other
    pub fn pair() -> (Self, Self) {
        let (client_tx, adapter_rx) = crossbeam_channel::unbounded();
        let (adapter_tx, client_rx) = crossbeam_channel::unbounded();

        let end = |rx, tx| Self {
            reader: InMemoryReader {
                buffer: Cursor::new(Vec::new()),
                rx,
            },
            writer: InMemoryWriter { tx },
        };

        (end(client_rx, client_tx), end(adapter_rx, adapter_tx))
    }
}

impl DapTransport for InMemoryTransport {
    type Reader = InMemoryReader;
    type Writer = InMemoryWriter;

    fn split(self) -> eyre::Result<(Self::Reader, Self::Writer)> {
        Ok((self.reader, self.writer))
    }
}

impl BufRead for InMemoryReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.buffer.position() >= self.buffer.get_ref().len() as u64 {
            match self.rx.try_recv() {
                Ok(data) => self.buffer = Cursor::new(data),
                Err(TryRecvError::Empty) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "no data available",
                    ));
                }
                Err(TryRecvError::Disconnected) => return Ok(&[]),
            }
        }

        self.buffer.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.buffer.consume(amt)
    }
}

impl Read for InMemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let len = std::cmp::min(available.len(), buf.len());
        buf[..len].copy_from_slice(&available[..len]);
        self.consume(len);
        Ok(len)
    }
}

impl Write for InMemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel disconnected"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
