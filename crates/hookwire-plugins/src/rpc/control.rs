//! Control stream: liveness and shutdown requests.

use std::sync::mpsc::Sender;
use std::time::Duration;

use hookwire_bridge::{
    BridgeError, PING_METHOD, QUIT_METHOD, RemoteError, RequestHandler, RpcClient,
};
use serde_json::Value;
use tracing::debug;

const CONTROL_TARGET: &str = "hookwire_plugins::rpc::control";

/// Host-side client for the control stream.
#[derive(Debug)]
pub struct ControlClient {
    rpc: RpcClient,
}

impl ControlClient {
    /// Wraps a client dialled on the control stream.
    #[must_use]
    pub const fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }

    /// Checks the plugin answers within `deadline`.
    ///
    /// # Errors
    ///
    /// Returns the bridge error when the plugin does not answer.
    pub fn ping(&self, deadline: Duration) -> Result<(), BridgeError> {
        self.rpc.call::<_, Value>(PING_METHOD, &(), Some(deadline))?;
        Ok(())
    }

    /// Asks the plugin process to stop serving and exit.
    ///
    /// # Errors
    ///
    /// Returns the bridge error when the request is not acknowledged.
    pub fn quit(&self, deadline: Duration) -> Result<(), BridgeError> {
        self.rpc.call::<_, Value>(QUIT_METHOD, &(), Some(deadline))?;
        Ok(())
    }
}

/// Plugin-side control handler.
///
/// A quit request is acknowledged first; the serve loop notices the signal
/// on its next poll, so the reply is normally on the wire before the
/// connection closes.
pub struct ControlServer {
    quit: Sender<()>,
}

impl ControlServer {
    /// Creates a handler that signals `quit` when asked to stop.
    #[must_use]
    pub const fn new(quit: Sender<()>) -> Self {
        Self { quit }
    }
}

impl RequestHandler for ControlServer {
    fn handle(&self, method: &str, _params: Value) -> Result<Value, RemoteError> {
        match method {
            PING_METHOD => Ok(Value::Null),
            QUIT_METHOD => {
                debug!(target: CONTROL_TARGET, "quit requested");
                if self.quit.send(()).is_err() {
                    debug!(target: CONTROL_TARGET, "serve loop already stopped");
                }
                Ok(Value::Null)
            }
            other => Err(RemoteError::MethodNotFound {
                method: other.to_owned(),
            }),
        }
    }
}
