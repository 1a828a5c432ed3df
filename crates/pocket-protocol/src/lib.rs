//! Wire protocol for Pocket.
//!
//! This crate defines what travels between clients and the relay:
//!
//! - **Control types** ([`ControlMessage`], [`ControlBody`], payload structs)
//!   for the reliable channel.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) turning control messages
//!   into frames and back.
//! - **Audio** ([`AudioPacket`]) the fixed binary datagram format for the
//!   unreliable channel.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (frames) → Protocol (ControlMessage) → Session (participants)
//! ```

mod audio;
mod codec;
mod error;
mod types;

pub use audio::AudioPacket;
pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    AudioReady, ControlBody, ControlMessage, JoinAccepted, JoinRejected,
    JoinRequest, MessageKind, ParticipantId, ParticipantNotice,
};
