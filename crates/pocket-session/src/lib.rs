//! Session membership for Pocket.
//!
//! This crate owns everything about *who* is in the session:
//!
//! 1. **Admission** deciding whether a join is allowed ([`Authenticator`],
//!    [`SessionPassword`])
//! 2. **Membership** the concurrent table of participants ([`Registry`])
//! 3. **Notifications** telling the host about joins, leaves and status
//!    ([`EventEmitter`], [`SessionEvent`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Coordinator / Relay (above)  ← look participants up, broadcast, fan out
//!     ↕
//! Session Layer (this crate)   ← participant identity and addresses
//!     ↕
//! Protocol Layer (below)       ← ParticipantId, JoinRequest
//! ```

mod auth;
mod config;
mod error;
mod events;
mod participant;
mod registry;

pub use auth::{Authenticator, INVALID_PASSWORD, SessionPassword};
pub use config::SessionConfig;
pub use error::SessionError;
pub use events::{EventEmitter, SessionEvent};
pub use participant::{ControlLink, Participant, display_name_for};
pub use registry::Registry;
