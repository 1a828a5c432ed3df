//! Participant records and their control-channel handle.

use std::net::SocketAddr;

use bytes::Bytes;
use pocket_protocol::{JoinRequest, ParticipantId};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

// ---------------------------------------------------------------------------
// ControlLink
// ---------------------------------------------------------------------------

/// Handle for pushing frames to one participant's control connection.
///
/// Frames go into an unbounded queue drained by that connection's writer
/// task, so a broadcast never waits on a slow peer. The cancellation token
/// lets anyone holding the link ask the connection to close.
#[derive(Debug, Clone)]
pub struct ControlLink {
    tx: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
}

impl ControlLink {
    /// Creates a link and the receiver its writer task drains.
    pub fn new(cancel: CancellationToken) -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, cancel }, rx)
    }

    /// Queues an encoded frame. Returns `false` if the connection is gone;
    /// callers log and move on.
    pub fn send(&self, frame: Bytes) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Asks the connection to close. Its handler performs the cleanup.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Completes once [`disconnect`](Self::disconnect) was called, or the
    /// parent token was cancelled.
    pub fn disconnected(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// `false` once the connection is closing or its writer has exited.
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// One member of the session, as stored in the registry.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub link: ControlLink,
    /// Where audio for this participant is sent. `None` until the client
    /// announces its UDP port.
    pub audio_addr: Option<SocketAddr>,
}

impl Participant {
    /// Creates a member with no audio address yet.
    pub fn new(
        id: ParticipantId,
        display_name: impl Into<String>,
        link: ControlLink,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            link,
            audio_addr: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.link.is_live()
    }
}

/// The name a joining participant is shown under: their username, or
/// `User{id}` when they sent none.
pub fn display_name_for(id: ParticipantId, request: &JoinRequest) -> String {
    match request.username() {
        Some(name) => name.to_string(),
        None => id.fallback_name(),
    }
}
