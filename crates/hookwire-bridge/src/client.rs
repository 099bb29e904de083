//! Client half of a dialled stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{BridgeError, RemoteError};
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::mux::{MuxShared, StreamHandler};
use crate::stream::StreamId;

const CLIENT_TARGET: &str = "hookwire_bridge::client";

/// Issues synchronous calls on one stream.
///
/// Safe to share between threads: concurrent calls are matched to their
/// replies by call id.
pub struct RpcClient {
    stream: StreamId,
    mux: Arc<MuxShared>,
    calls: Arc<PendingCalls>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub(crate) const fn new(stream: StreamId, mux: Arc<MuxShared>, calls: Arc<PendingCalls>) -> Self {
        Self {
            stream,
            mux,
            calls,
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the stream this client is bound to.
    #[must_use]
    pub const fn stream(&self) -> StreamId {
        self.stream
    }

    /// Calls `method` and waits for the reply.
    ///
    /// With `deadline` set to `None` the call waits until a reply arrives or
    /// the connection ends. With a deadline the call is abandoned once it
    /// elapses and any late reply is discarded.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Remote` when the peer's handler fails,
    /// `BridgeError::DeadlineExceeded` when the deadline passes,
    /// `BridgeError::ConnectionLost` when the peer goes away and
    /// `BridgeError::Codec` when parameters or result do not (de)serialise.
    pub fn call<P, R>(
        &self,
        method: &str,
        params: &P,
        deadline: Option<Duration>,
    ) -> Result<R, BridgeError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, Some(serde_json::to_value(params)?));
        let payload = serde_json::to_vec(&request)?;

        let receiver = self.calls.register(id)?;
        debug!(target: CLIENT_TARGET, stream = %self.stream, method, id, "sending request");
        if let Err(error) = self.mux.send(self.stream, &payload) {
            self.calls.abandon(id);
            return Err(error);
        }

        let response = self.wait(&receiver, id, method, deadline)?;
        if let Some(error) = response.error {
            return Err(BridgeError::Remote(RemoteError::from_wire(error)));
        }
        let result = response.result.unwrap_or(Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    fn wait(
        &self,
        receiver: &Receiver<JsonRpcResponse>,
        id: u64,
        method: &str,
        deadline: Option<Duration>,
    ) -> Result<JsonRpcResponse, BridgeError> {
        let Some(limit) = deadline else {
            return receiver.recv().map_err(|_| BridgeError::ConnectionLost);
        };
        match receiver.recv_timeout(limit) {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => {
                self.calls.abandon(id);
                debug!(target: CLIENT_TARGET, stream = %self.stream, method, id, "call abandoned");
                Err(BridgeError::DeadlineExceeded {
                    method: method.to_owned(),
                    deadline: limit,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::ConnectionLost),
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

/// Outstanding calls on one stream, keyed by call id.
#[derive(Default)]
pub(crate) struct PendingCalls {
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    closed: bool,
    waiting: HashMap<u64, Sender<JsonRpcResponse>>,
}

impl PendingCalls {
    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, id: u64) -> Result<Receiver<JsonRpcResponse>, BridgeError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BridgeError::ConnectionLost);
        }
        let (sender, receiver) = mpsc::channel();
        state.waiting.insert(id, sender);
        Ok(receiver)
    }

    fn abandon(&self, id: u64) {
        self.lock().waiting.remove(&id);
    }
}

impl StreamHandler for PendingCalls {
    fn on_frame(&self, payload: Vec<u8>) {
        let response: JsonRpcResponse = match serde_json::from_slice(&payload) {
            Ok(response) => response,
            Err(error) => {
                warn!(target: CLIENT_TARGET, %error, "discarding malformed response");
                return;
            }
        };
        let id = response.id;
        let waiter = self.lock().waiting.remove(&id);
        match waiter {
            Some(sender) => {
                if sender.send(response).is_err() {
                    debug!(target: CLIENT_TARGET, id, "caller stopped waiting");
                }
            }
            None => debug!(target: CLIENT_TARGET, id, "discarding reply for abandoned call"),
        }
    }

    fn on_close(&self) {
        let mut state = self.lock();
        state.closed = true;
        // Dropping the senders wakes every waiting caller.
        state.waiting.clear();
    }
}
