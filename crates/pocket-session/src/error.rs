//! Error types for the session layer.

use std::net::SocketAddr;

use pocket_protocol::ParticipantId;

/// Errors that can occur during admission or registry updates.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The join was refused. The string is sent to the client verbatim as
    /// the rejection reason.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No participant with this id is registered.
    #[error("participant {0} not found")]
    NotFound(ParticipantId),

    /// A participant with this id is already registered.
    #[error("participant {0} is already registered")]
    AlreadyRegistered(ParticipantId),

    /// Another participant already receives audio on this address.
    #[error("audio address {0} is already in use")]
    AddressInUse(SocketAddr),
}
