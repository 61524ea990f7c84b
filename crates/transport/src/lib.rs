//! DAP Client
//!
//! This crate contains the wire layer used to drive `lldb-dap`: message
//! framing, typed requests, responses and events, and a client that routes
//! responses back to their callers while forwarding events on a channel.
mod client;
pub mod events;
pub mod io;
pub mod reader;
mod request_store;
pub mod requests;
pub mod responses;
pub mod types;

pub use client::{Client, PendingResponse};
pub use client::Message;
pub use client::write_frame;
pub use io::{DapTransport, InMemoryTransport, StdioTransport};
pub use reader::Reader;
