//! Server half of a stream: request decoding and dispatch.

use std::sync::{Arc, Weak};
use std::thread;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::mux::{MuxShared, StreamHandler};
use crate::stream::StreamId;

const SERVER_TARGET: &str = "hookwire_bridge::server";

/// Answers requests arriving on a served stream.
///
/// Each request is handled on its own thread, so implementations may block
/// (including on calls back to the peer) without stalling other streams.
pub trait RequestHandler: Send + Sync {
    /// Handles one request and returns its result value.
    ///
    /// # Errors
    ///
    /// Returns the portable error to send back to the caller.
    fn handle(&self, method: &str, params: Value) -> Result<Value, RemoteError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&str, Value) -> Result<Value, RemoteError> + Send + Sync,
{
    fn handle(&self, method: &str, params: Value) -> Result<Value, RemoteError> {
        self(method, params)
    }
}

/// Decodes request parameters into a typed value.
///
/// # Errors
///
/// Returns `RemoteError::InvalidParams` when the value does not match `T`.
pub fn decode_params<T: DeserializeOwned>(params: Value) -> Result<T, RemoteError> {
    serde_json::from_value(params).map_err(|error| RemoteError::InvalidParams {
        message: error.to_string(),
    })
}

/// Encodes a typed result for the reply.
///
/// # Errors
///
/// Returns a message-only error when the value cannot be serialised.
pub fn encode_result<T: Serialize>(value: &T) -> Result<Value, RemoteError> {
    serde_json::to_value(value).map_err(RemoteError::message)
}

pub(crate) struct ServerStream {
    stream: StreamId,
    handler: Arc<dyn RequestHandler>,
    mux: Weak<MuxShared>,
}

impl ServerStream {
    pub(crate) fn new(stream: StreamId, handler: Arc<dyn RequestHandler>, mux: Weak<MuxShared>) -> Self {
        Self {
            stream,
            handler,
            mux,
        }
    }
}

impl StreamHandler for ServerStream {
    fn on_frame(&self, payload: Vec<u8>) {
        let request: JsonRpcRequest = match serde_json::from_slice(&payload) {
            Ok(request) => request,
            Err(error) => {
                warn!(target: SERVER_TARGET, stream = %self.stream, %error, "discarding malformed request");
                return;
            }
        };
        let id = request.id;
        let stream = self.stream;
        let handler = Arc::clone(&self.handler);
        let mux = self.mux.clone();
        let spawned = thread::Builder::new()
            .name(format!("hookwire-call-{stream}"))
            .spawn(move || respond(&mux, stream, handler.as_ref(), request));
        if let Err(error) = spawned {
            warn!(target: SERVER_TARGET, %stream, id, %error, "cannot spawn request thread");
            let failure = JsonRpcResponse::failure(id, RemoteError::message(&error).to_wire());
            send_response(&self.mux, stream, &failure);
        }
    }

    fn on_close(&self) {
        debug!(target: SERVER_TARGET, stream = %self.stream, "served stream closed");
    }
}

fn respond(mux: &Weak<MuxShared>, stream: StreamId, handler: &dyn RequestHandler, request: JsonRpcRequest) {
    let JsonRpcRequest {
        id, method, params, ..
    } = request;
    debug!(target: SERVER_TARGET, %stream, method, id, "handling request");
    let response = match handler.handle(&method, params.unwrap_or(Value::Null)) {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => {
            debug!(target: SERVER_TARGET, %stream, method, id, %error, "request failed");
            JsonRpcResponse::failure(id, error.to_wire())
        }
    };
    send_response(mux, stream, &response);
}

fn send_response(mux: &Weak<MuxShared>, stream: StreamId, response: &JsonRpcResponse) {
    let Some(shared) = mux.upgrade() else {
        return;
    };
    let payload = match serde_json::to_vec(response) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(target: SERVER_TARGET, %stream, %error, "cannot encode response");
            return;
        }
    };
    if let Err(error) = shared.send(stream, &payload) {
        debug!(target: SERVER_TARGET, %stream, %error, "response not delivered");
    }
}
