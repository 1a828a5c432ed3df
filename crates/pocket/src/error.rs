//! Unified error type for Pocket.

use std::time::Duration;

use pocket_protocol::ProtocolError;
use pocket_relay::RelayError;
use pocket_session::SessionError;
use pocket_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum PocketError {
    /// A transport-level error (bind, connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, truncated packet).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (auth, registry).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The audio relay could not be set up.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The server refused the join. Carries its reason text.
    #[error("join rejected: {0}")]
    Rejected(String),

    /// No `join` arrived, or no answer to one, in time.
    #[error("no join exchange within {0:?}")]
    JoinTimeout(Duration),

    /// A socket operation outside the transport layer failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
