//! # Pocket
//!
//! A small real-time voice session relay.
//!
//! A host runs a rendezvous server; participants join a named, optionally
//! password-protected session over a reliable control channel (TCP) and
//! exchange audio packets through the server's relay (UDP).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pocket::prelude::*;
//!
//! # async fn run() -> Result<(), PocketError> {
//! // Host side.
//! let session = pocket::start("Jam", "").await?;
//!
//! // Participant side.
//! let mut client = PocketClient::connect("127.0.0.1", 8080, "Alice", "", "Jam").await?;
//! client.send_audio(vec![1u8, 2, 3]).await?;
//!
//! client.disconnect().await;
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod handler;
mod server;

pub use client::PocketClient;
pub use config::ServerConfig;
pub use error::PocketError;
pub use server::{ParticipantSummary, SessionCoordinator, SessionHandle, start};

pub use pocket_protocol::{AudioPacket, JoinRequest, ParticipantId};
pub use pocket_relay::RelayStatsSnapshot;
pub use pocket_session::{Authenticator, SessionConfig, SessionError, SessionEvent};

/// Everything a host or client usually needs.
pub mod prelude {
    pub use crate::{
        AudioPacket, Authenticator, JoinRequest, ParticipantId, ParticipantSummary,
        PocketClient, PocketError, ServerConfig, SessionConfig,
        SessionCoordinator, SessionEvent, SessionHandle,
    };
}
