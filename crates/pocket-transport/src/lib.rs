//! Reliable framed channel for Pocket's control messages.
//!
//! [`Transport`] hands out connections; [`Connection`] moves whole frames.
//! The one implementation is TCP with a 4-byte big-endian length prefix
//! ([`TcpTransport`], [`TcpConnection`]).
//!
//! Frames are opaque here. Control messages, participants, and sessions
//! live in the layers above.

#![allow(async_fn_in_trait)]

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::{DEFAULT_MAX_FRAME_LEN, TcpConnection, TcpTransport};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide label for one control connection, used in logs. Distinct
/// from the participant id the session assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next unused id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Source of inbound control connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next peer.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Where peers should connect. Resolves port 0 to the real port.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// One peer's control channel.
///
/// Each call to [`send`](Self::send) produces exactly one frame at the
/// other end, however the bytes get split or merged in transit.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    async fn send(&self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Next frame, or `Ok(None)` once the peer has closed its side.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Flushes what was sent and closes our side. Frames still in flight
    /// from the peer can be read afterwards.
    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;

    /// The peer's address. Its IP is where the peer's audio is sent.
    fn peer_addr(&self) -> SocketAddr;
}
