//! Virtual stream identifiers and per-side allocation.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Identifier of one virtual stream on a multiplexed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(u32);

impl StreamId {
    /// Stream carrying the handshake, ping and quit requests.
    pub const CONTROL: Self = Self(0);

    /// Stream on which a plugin serves its hooks to the host.
    pub const HOOKS: Self = Self(1);

    /// Wraps a raw stream number.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw stream number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which end of a connection a multiplexer runs on.
///
/// The host allocates even stream ids and the plugin odd ones, so streams
/// opened independently by both peers never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The supervising host process.
    Host,
    /// The plugin process.
    Plugin,
}

impl Side {
    const fn first_stream(self) -> u32 {
        match self {
            Self::Host => 2,
            Self::Plugin => 3,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StreamAllocator {
    next: AtomicU32,
}

impl StreamAllocator {
    pub(crate) const fn new(side: Side) -> Self {
        Self {
            next: AtomicU32::new(side.first_stream()),
        }
    }

    pub(crate) fn allocate(&self) -> StreamId {
        StreamId(self.next.fetch_add(2, Ordering::Relaxed))
    }
}
