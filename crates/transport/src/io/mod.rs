//! Byte transports a [`crate::Client`] can run over
//!
//! `lldb-dap` speaks DAP on its stdin/stdout, so the production transport is
//! [`StdioTransport`] wrapping the pipes of the adapter child process.
//! [`InMemoryTransport`] lets tests play the adapter side.

use std::io::{BufRead, Write};

mod memory;
mod stdio;

pub use memory::InMemoryTransport;
pub use stdio::StdioTransport;

/// Bidirectional DAP message transport
///
/// The transport is split into a reader half, moved into the client's
/// background thread, and a writer half kept by the client. Readers may return
/// `WouldBlock` when no data is available yet.
pub trait DapTransport: Send + 'static {
    type Reader: BufRead + Send + 'static;
    type Writer: Write + Send + 'static;

    fn split(self) -> eyre::Result<(Self::Reader, Self::Writer)>;
}
