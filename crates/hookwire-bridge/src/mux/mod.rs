//! Stream multiplexer over one frame connection.
//!
//! A single reader thread owns the inbound half of the connection and routes
//! each frame to the handler bound to its stream. Outbound frames from every
//! stream share one mutex-guarded writer, so frames never interleave.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;

use tracing::{debug, warn};

use crate::client::{PendingCalls, RpcClient};
use crate::error::{BridgeError, TransportError};
use crate::server::{RequestHandler, ServerStream};
use crate::stream::{Side, StreamAllocator, StreamId};
use crate::transport::{FrameReader, FrameWriter};

pub(crate) const MUX_TARGET: &str = "hookwire_bridge::mux";

/// Receives the frames routed to one stream.
pub trait StreamHandler: Send + Sync {
    /// Called on the reader thread for every frame addressed to the stream.
    /// Implementations must not block.
    fn on_frame(&self, payload: Vec<u8>);

    /// Called once when the underlying connection ends.
    fn on_close(&self);
}

type SharedWriter = FrameWriter<Box<dyn Write + Send>>;

pub(crate) struct MuxShared {
    side: Side,
    writer: Mutex<Option<SharedWriter>>,
    routes: RwLock<Routes>,
    allocator: StreamAllocator,
}

#[derive(Default)]
struct Routes {
    closed: bool,
    handlers: HashMap<StreamId, Arc<dyn StreamHandler>>,
}

impl MuxShared {
    pub(crate) fn send(&self, stream: StreamId, payload: &[u8]) -> Result<(), BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::ConnectionLost);
        }
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = guard.as_mut() else {
            return Err(BridgeError::ConnectionLost);
        };
        writer
            .write_frame(stream, payload)
            .map_err(|error| match error {
                TransportError::Io(_) | TransportError::Closed => BridgeError::ConnectionLost,
                other => BridgeError::Transport(other),
            })
    }

    fn is_closed(&self) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    fn bind(&self, stream: StreamId, handler: Arc<dyn StreamHandler>) -> Result<(), BridgeError> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes.closed {
            return Err(BridgeError::ConnectionLost);
        }
        if routes.handlers.contains_key(&stream) {
            return Err(BridgeError::StreamInUse { stream });
        }
        routes.handlers.insert(stream, handler);
        Ok(())
    }

    fn route(&self, stream: StreamId, payload: Vec<u8>) {
        let handler = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .get(&stream)
            .cloned();
        match handler {
            Some(handler) => handler.on_frame(payload),
            None => warn!(
                target: MUX_TARGET,
                side = ?self.side,
                %stream,
                "dropping frame for unbound stream"
            ),
        }
    }

    fn close(&self) {
        // Dropping the writer signals end of input to the peer.
        drop(
            self.writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handlers: Vec<Arc<dyn StreamHandler>> = {
            let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
            routes.closed = true;
            routes.handlers.drain().map(|(_, handler)| handler).collect()
        };
        for handler in handlers {
            handler.on_close();
        }
    }
}

/// Splits one connection into independently served or dialled streams.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<MuxShared>,
}

impl Multiplexer {
    /// Starts routing frames from `reader` and returns the multiplexer.
    ///
    /// The reader thread runs until the peer closes the connection or a frame
    /// cannot be read, at which point every bound stream is closed.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Transport` if the reader thread cannot be spawned.
    pub fn start<R, W>(reader: FrameReader<R>, writer: W, side: Side) -> Result<Self, BridgeError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let boxed: Box<dyn Write + Send> = Box::new(writer);
        let shared = Arc::new(MuxShared {
            side,
            writer: Mutex::new(Some(FrameWriter::new(boxed))),
            routes: RwLock::new(Routes::default()),
            allocator: StreamAllocator::new(side),
        });
        let reader_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name(format!("hookwire-mux-{side:?}").to_lowercase())
            .spawn(move || read_loop(&reader_shared, reader))
            .map_err(|error| BridgeError::Transport(TransportError::Io(error)))?;
        Ok(Self { shared })
    }

    /// Allocates a stream id unique to this connection.
    #[must_use]
    pub fn open_stream(&self) -> StreamId {
        self.shared.allocator.allocate()
    }

    /// Serves requests arriving on `stream` with `handler`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::StreamInUse` if the stream is already bound and
    /// `BridgeError::ConnectionLost` if the connection has ended.
    pub fn serve(
        &self,
        stream: StreamId,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), BridgeError> {
        let server = ServerStream::new(stream, handler, Arc::downgrade(&self.shared));
        self.shared.bind(stream, Arc::new(server))?;
        debug!(target: MUX_TARGET, side = ?self.shared.side, %stream, "serving stream");
        Ok(())
    }

    /// Connects to a stream served by the peer.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::StreamInUse` if the stream is already bound and
    /// `BridgeError::ConnectionLost` if the connection has ended.
    pub fn dial(&self, stream: StreamId) -> Result<RpcClient, BridgeError> {
        let calls = Arc::new(PendingCalls::default());
        self.shared.bind(stream, Arc::clone(&calls) as Arc<dyn StreamHandler>)?;
        debug!(target: MUX_TARGET, side = ?self.shared.side, %stream, "dialled stream");
        Ok(RpcClient::new(stream, Arc::clone(&self.shared), calls))
    }

    /// Binds a custom frame handler to a stream.
    ///
    /// # Errors
    ///
    /// Same as [`Multiplexer::serve`].
    pub fn bind(&self, stream: StreamId, handler: Arc<dyn StreamHandler>) -> Result<(), BridgeError> {
        self.shared.bind(stream, handler)
    }

    /// Returns true once the connection has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Ends the connection from this side.
    ///
    /// The outbound half is dropped so the peer observes end of input, and
    /// every bound stream is closed so pending calls fail immediately.
    pub fn close(&self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("side", &self.shared.side)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn read_loop<R: Read>(shared: &MuxShared, mut reader: FrameReader<R>) {
    let mut closed_by_peer = false;
    loop {
        match reader.read_frame() {
            Ok(frame) => shared.route(frame.stream, frame.payload),
            Err(TransportError::Closed) => {
                closed_by_peer = true;
                break;
            }
            Err(error) => {
                warn!(target: MUX_TARGET, side = ?shared.side, %error, "connection failed");
                break;
            }
        }
    }
    debug!(
        target: MUX_TARGET,
        side = ?shared.side,
        closed_by_peer,
        "reader stopped"
    );
    shared.close();
}
