use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::io::DapTransport;
use crate::request_store::{RequestStore, WaitingRequest};
use crate::responses::Response;
use crate::{Reader, events, reader, requests, responses};

/// How long [`Client::send`] waits for the adapter to answer
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum Message {
    Event(events::Event),
    Response(responses::Response),
}

/// Write one `Content-Length` framed message in a single write
pub fn write_frame<W, T>(output: &mut W, message: &T) -> Result<()>
where
    W: Write + ?Sized,
    T: Serialize,
{
    let json = serde_json::to_string(message).wrap_err("encoding json body")?;
    let frame = format!("Content-Length: {}\r\n\r\n{}", json.len(), json);
    output
        .write_all(frame.as_bytes())
        .wrap_err("writing message to output buffer")?;
    output.flush().wrap_err("flushing output buffer")?;
    Ok(())
}

struct ClientInternals {
    output: Box<dyn Write + Send>,
    sequence_number: AtomicI64,
    store: RequestStore,
    // Option because of drop and take
    exit: Option<oneshot::Sender<()>>,
}

/// DAP client
///
/// A background thread reads every message from the adapter: responses are
/// delivered to the caller waiting in [`Client::send`], events are forwarded on
/// the channel given at construction. The channel disconnects once the
/// adapter closes its output.
#[derive(Clone)]
pub struct Client {
    internals: Arc<Mutex<ClientInternals>>,
    store: RequestStore,
}

impl Client {
    /// Create a new DAP client over any [`DapTransport`]
    ///
    /// ```
    /// use transport::{Client, io::InMemoryTransport};
    ///
    /// let (client_transport, _server_transport) = InMemoryTransport::pair();
    /// let (tx, _rx) = crossbeam_channel::unbounded();
    /// let client = Client::with_transport(client_transport, tx)?;
    /// # Ok::<(), eyre::Error>(())
    /// ```
    pub fn with_transport<T>(
        transport: T,
        events: crossbeam_channel::Sender<events::Event>,
    ) -> Result<Self>
    where
        T: DapTransport,
    {
        let (input, output) = transport.split()?;

        let store = RequestStore::default();
        let store_clone = Arc::clone(&store);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        thread::Builder::new()
            .name("dap-reader".to_string())
            .spawn(move || {
                let mut reader = reader::get(input);

                loop {
                    match shutdown_rx.try_recv() {
                        Ok(_) => break,
                        Err(oneshot::TryRecvError::Empty) => {}
                        Err(e) => {
                            tracing::debug!(error = %e, "shutdown sender closed");
                            break;
                        }
                    }

                    match reader.poll_message() {
                        Ok(Some(Message::Event(evt))) => {
                            let _ = events.send(evt);
                        }
                        Ok(Some(Message::Response(r))) => {
                            with_lock("Reader.store", store_clone.as_ref(), |mut store| {
                                match store.remove(&r.request_seq) {
                                    Some(WaitingRequest(body, tx)) => {
                                        tracing::trace!(
                                            command = body.command(),
                                            seq = r.request_seq,
                                            "delivering response"
                                        );
                                        let _ = tx.send(r);
                                    }
                                    None => {
                                        tracing::warn!(response = ?r, "no message in request store")
                                    }
                                }
                            });
                        }
                        Ok(None) => {
                            tracing::debug!("adapter closed its output");
                            break;
                        }
                        Err(e) => tracing::warn!(error = %e, "reader error"),
                    }
                }

                // wake anyone still waiting for a response
                with_lock("Reader.store", store_clone.as_ref(), |mut store| {
                    store.clear();
                });
            })
            .wrap_err("spawning reader thread")?;

        let internals = ClientInternals {
            output: Box::new(output),
            sequence_number: AtomicI64::new(0),
            store: Arc::clone(&store),
            exit: Some(shutdown_tx),
        };

        Ok(Self {
            internals: Arc::new(Mutex::new(internals)),
            store,
        })
    }

    /// Send a request and block until the adapter responds
    #[tracing::instrument(skip(self, body), level = "debug", fields(command = body.command()))]
    pub fn send(&self, body: requests::RequestBody) -> Result<Response> {
        self.request(body)?.wait(RESPONSE_TIMEOUT)
    }

    /// Send a request and return a handle to its response
    ///
    /// Lets the caller keep talking to the adapter while the answer is
    /// outstanding, as `launch` needs.
    pub fn request(&self, body: requests::RequestBody) -> Result<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        let seq = with_lock("Client.internals", self.internals.as_ref(), |mut internals| {
            internals.write_request(body, Some(tx))
        })?;
        Ok(PendingResponse {
            seq,
            rx,
            store: Arc::clone(&self.store),
        })
    }

    /// Send a request but do not wait for a response
    #[tracing::instrument(skip(self, body), level = "debug", fields(command = body.command()))]
    pub fn execute(&self, body: requests::RequestBody) -> Result<()> {
        with_lock("Client.internals", self.internals.as_ref(), |mut internals| {
            internals.write_request(body, None)
        })
        .map(|_| ())
    }
}

/// The response to a request sent with [`Client::request`]
pub struct PendingResponse {
    seq: i64,
    rx: oneshot::Receiver<Response>,
    store: RequestStore,
}

impl PendingResponse {
    pub fn seq(&self) -> i64 {
        self.seq
    }

    /// The response, if it has arrived
    pub fn try_take(&self) -> Result<Option<Response>> {
        match self.rx.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(oneshot::TryRecvError::Empty) => Ok(None),
            Err(oneshot::TryRecvError::Disconnected) => {
                eyre::bail!(
                    "adapter connection closed before request {} was answered",
                    self.seq
                )
            }
        }
    }

    pub fn wait(self, timeout: Duration) -> Result<Response> {
        match self.rx.recv_timeout(timeout) {
            Ok(response) => Ok(response),
            Err(oneshot::RecvTimeoutError::Timeout) => {
                with_lock("PendingResponse.store", self.store.as_ref(), |mut store| {
                    store.remove(&self.seq);
                });
                eyre::bail!("request {} timed out after {:?}", self.seq, timeout)
            }
            Err(oneshot::RecvTimeoutError::Disconnected) => {
                eyre::bail!(
                    "adapter connection closed before request {} was answered",
                    self.seq
                )
            }
        }
    }
}

fn with_lock<T, F, R>(name: &str, lock: &Mutex<T>, f: F) -> R
where
    F: FnOnce(MutexGuard<'_, T>) -> R,
{
    tracing::trace!(%name, "taking lock");
    let inner = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let res = f(inner);
    tracing::trace!(%name, "releasing lock");
    res
}

impl ClientInternals {
    fn write_request(
        &mut self,
        body: requests::RequestBody,
        waiter: Option<oneshot::Sender<Response>>,
    ) -> Result<i64> {
        let seq = self.sequence_number.fetch_add(1, Ordering::SeqCst) + 1;
        let message = requests::Request {
            seq,
            r#type: "request".to_string(),
            body: body.clone(),
        };

        if let Some(tx) = waiter {
            with_lock("ClientInternals.store", self.store.as_ref(), |mut store| {
                store.insert(seq, WaitingRequest(body, tx));
            });
        }

        tracing::debug!(seq, "sending message");
        if let Err(e) = write_frame(&mut self.output, &message) {
            with_lock("ClientInternals.store", self.store.as_ref(), |mut store| {
                store.remove(&seq);
            });
            return Err(e);
        }
        Ok(seq)
    }
}

impl Drop for ClientInternals {
    fn drop(&mut self) {
        tracing::debug!("shutting down client");
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(());
        }
    }
}
