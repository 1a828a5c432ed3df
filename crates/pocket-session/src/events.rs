//! Notifications from the session core to the hosting application.
//!
//! Events are pushed into an unbounded channel the host drains at its own
//! pace, from whatever task or thread it likes. The core never waits on the
//! host and never assumes where events are consumed.

use tokio::sync::mpsc;

/// Something the host may want to show or log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A participant was admitted. Carries the display name.
    ParticipantJoined(String),
    /// A participant was removed. Carries the display name.
    ParticipantLeft(String),
    /// Human-readable status line (start/stop, errors, audio readiness).
    Status(String),
}

/// Sending side of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventEmitter {
    /// Creates an emitter and the receiver the host drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emits an event. Dropped silently if nobody is listening.
    pub fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped, discarding event");
        }
    }

    pub fn joined(&self, name: impl Into<String>) {
        self.emit(SessionEvent::ParticipantJoined(name.into()));
    }

    pub fn left(&self, name: impl Into<String>) {
        self.emit(SessionEvent::ParticipantLeft(name.into()));
    }

    pub fn status(&self, text: impl Into<String>) {
        self.emit(SessionEvent::Status(text.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitter_delivers_in_order() {
        let (events, mut rx) = EventEmitter::channel();

        events.joined("Alice");
        events.status("Alice joined (1 total)");
        events.left("Alice");

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::ParticipantJoined("Alice".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Status("Alice joined (1 total)".into())
        );
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::ParticipantLeft("Alice".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emitter_without_receiver_does_not_panic() {
        let (events, rx) = EventEmitter::channel();
        drop(rx);
        events.status("nobody hears this");
    }
}
