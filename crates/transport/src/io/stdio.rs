//! Transport over a child process's pipes

use std::io::{BufReader, Read, Write};

use super::DapTransport;

/// Transport over the stdout (read) and stdin (write) of an adapter process
///
/// Reads block until the adapter writes or exits; the adapter exiting closes
/// the pipe, which the client sees as end of stream.
pub struct StdioTransport<R, W> {
    output: R,
    input: W,
}

impl<R, W> StdioTransport<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    pub fn new(output: R, input: W) -> Self {
        Self { output, input }
    }
}

impl<R, W> DapTransport for StdioTransport<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    type Reader = BufReader<R>;
    type Writer = W;

    fn split(self) -> eyre::Result<(Self::Reader, Self::Writer)> {
        Ok((BufReader::new(self.output), self.input))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, Cursor};

    use super::*;

    #[test]
    fn splits_into_buffered_reader_and_raw_writer() -> eyre::Result<()> {
        let transport = StdioTransport::new(Cursor::new(b"hello\n".to_vec()), Vec::new());
        let (mut reader, mut writer) = transport.split()?;

        let mut line = String::new();
        reader.read_line(&mut line)?;
        assert_eq!(line, "hello\n");

        writer.write_all(b"abc")?;
        assert_eq!(writer, b"abc");
        Ok(())
    }
}
