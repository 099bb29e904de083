//! Multiplexed request/response bridge between a host and its plugin processes.
//!
//! A host and a plugin share one byte channel, normally the plugin's stdio.
//! [`Multiplexer`] splits that channel into virtual streams. Each stream is
//! either served on one side by a [`RequestHandler`] or dialled from the other
//! side as an [`RpcClient`]. Calls are synchronous: a caller blocks until the
//! matching reply arrives, the optional deadline passes, or the peer goes away.
//!
//! Errors that cross the boundary travel as [`RemoteError`] values so that a
//! small set of well-known kinds (end of stream, no rows, not implemented, and
//! so on) can still be matched on the receiving side.

mod client;
pub mod error;
pub mod handshake;
pub mod jsonrpc;
mod mux;
mod server;
mod stream;
pub mod transport;

pub use client::RpcClient;
pub use error::{BridgeError, RemoteError, TransportError};
pub use handshake::{
    Handshake, HandshakeConfig, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_VERSION,
};
pub use mux::{Multiplexer, StreamHandler};
pub use server::{RequestHandler, decode_params, encode_result};
pub use stream::{Side, StreamId};
pub use transport::{Frame, FrameReader, FrameWriter};

/// Control-stream method a plugin answers to prove it is alive.
pub const PING_METHOD: &str = "control.ping";

/// Control-stream method asking a plugin process to stop serving and exit.
pub const QUIT_METHOD: &str = "control.quit";
