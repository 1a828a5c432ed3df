//! Per-connection handler: join, audio-ready, leave, and cleanup.
//!
//! Each accepted connection gets its own task running this handler, plus
//! a writer task that drains the connection's outbound queue. The
//! handler walks a small state machine:
//!
//! ```text
//!   Connected ──(join accepted)──→ Member
//!       │                            │
//!       └──(reject / leave / EOF / error / timeout / stop)──→ Closed
//! ```
//!
//! Messages from one connection are handled strictly in arrival order.
//! Leaving Member always goes through the registry, so participant-left is
//! announced exactly once.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pocket_protocol::{
    AudioReady, Codec, ControlBody, ControlMessage, JoinAccepted, JoinRejected,
    JoinRequest, JsonCodec, ParticipantId, ParticipantNotice, ProtocolError,
};
use pocket_session::{ControlLink, Participant, SessionError, display_name_for};
use pocket_transport::{Connection, TcpConnection};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::PocketError;
use crate::server::ServerState;

/// How long the writer gets to flush queued frames once the handler is
/// done with a connection.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

enum Phase {
    Connected,
    Member { display_name: String },
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: TcpConnection,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) -> Result<(), PocketError> {
    let conn = Arc::new(conn);
    let id = state.registry.next_id();
    tracing::debug!(
        conn_id = %conn.id(),
        participant_id = %id,
        peer = %conn.peer_addr(),
        "handling new connection"
    );

    let (link, outbound) = ControlLink::new(cancel);
    let mut writer = tokio::spawn(write_loop(Arc::clone(&conn), outbound));

    let result = run(&conn, &state, id, &link).await;

    // --- Closed ---
    if let Some(participant) = state.registry.remove(id) {
        let count = state.registry.count();
        tracing::info!(
            participant_id = %id,
            name = %participant.display_name,
            count,
            "participant left"
        );
        state.events.left(participant.display_name.clone());
        state
            .events
            .status(format!("{} left ({count} total)", participant.display_name));
        broadcast(
            &state,
            &ControlBody::ParticipantLeft(ParticipantNotice {
                display_name: participant.display_name,
            }),
            id,
        );
    }

    // Dropping the last sender lets the writer flush and close.
    drop(link);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        tracing::debug!(participant_id = %id, "writer did not drain in time");
        writer.abort();
    }

    result
}

/// Reads and dispatches frames until the connection should close.
async fn run(
    conn: &TcpConnection,
    state: &ServerState,
    id: ParticipantId,
    link: &ControlLink,
) -> Result<(), PocketError> {
    let mut phase = Phase::Connected;
    let join_deadline = tokio::time::Instant::now() + state.join_timeout;

    loop {
        let received = tokio::select! {
            _ = link.disconnected() => {
                tracing::debug!(participant_id = %id, "disconnect requested");
                return Ok(());
            }
            _ = tokio::time::sleep_until(join_deadline), if matches!(phase, Phase::Connected) => {
                tracing::info!(participant_id = %id, "no join received in time");
                let e = PocketError::JoinTimeout(state.join_timeout);
                report_disconnect(state, id, &phase, &e);
                return Err(e);
            }
            received = conn.recv() => received,
        };

        let data = match received {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(participant_id = %id, "connection closed by peer");
                return Ok(());
            }
            Err(e) => {
                let e = PocketError::from(e);
                report_disconnect(state, id, &phase, &e);
                return Err(e);
            }
        };

        // Malformed control input ends the connection.
        let body = match decode_body(&state.codec, &data) {
            Ok(body) => body,
            Err(e) => {
                let e = PocketError::from(e);
                report_disconnect(state, id, &phase, &e);
                return Err(e);
            }
        };
        tracing::trace!(participant_id = %id, kind = %body.kind(), "control message");

        match body {
            ControlBody::Join(request) if matches!(phase, Phase::Connected) => {
                match admit(conn, state, id, link, &request) {
                    Some(display_name) => phase = Phase::Member { display_name },
                    None => return Ok(()),
                }
            }
            ControlBody::Leave => {
                tracing::debug!(participant_id = %id, "leave received");
                return Ok(());
            }
            other => match (&phase, &other) {
                (Phase::Member { display_name }, ControlBody::AudioReady(ready)) => {
                    set_audio_addr(conn.peer_addr(), state, id, display_name, ready);
                }
                _ => {
                    tracing::debug!(
                        participant_id = %id,
                        kind = %other.kind(),
                        "ignoring unexpected control message"
                    );
                }
            },
        }
    }
}

/// Announces a connection ending on a failure, naming the member if it
/// had joined.
fn report_disconnect(
    state: &ServerState,
    id: ParticipantId,
    phase: &Phase,
    error: &PocketError,
) {
    let name = match phase {
        Phase::Member { display_name } => display_name.clone(),
        Phase::Connected => id.to_string(),
    };
    tracing::debug!(participant_id = %id, error = %error, "connection failed");
    state
        .events
        .status(format!("Client {name} disconnected: {error}"));
}

fn decode_body(codec: &JsonCodec, data: &[u8]) -> Result<ControlBody, ProtocolError> {
    let message: ControlMessage = codec.decode(data)?;
    message.body()
}

/// Runs the join exchange. Returns the display name if admitted, `None`
/// if the connection should close.
fn admit(
    conn: &TcpConnection,
    state: &ServerState,
    id: ParticipantId,
    link: &ControlLink,
    request: &JoinRequest,
) -> Option<String> {
    if let Err(e) = state.auth.authorize(request) {
        let reason_text = match e {
            SessionError::AuthFailed(reason) => reason,
            other => other.to_string(),
        };
        tracing::info!(
            participant_id = %id,
            peer = %conn.peer_addr(),
            reason = %reason_text,
            "join rejected"
        );
        send(
            state,
            id,
            link,
            &ControlBody::JoinRejected(JoinRejected { reason_text }),
        );
        return None;
    }

    let display_name = display_name_for(id, request);
    let participant = Participant::new(id, display_name.clone(), link.clone());
    if let Err(e) = state.registry.add(participant) {
        tracing::warn!(
            participant_id = %id,
            error = %e,
            "could not register participant"
        );
        return None;
    }

    let count = state.registry.count();
    send(
        state,
        id,
        link,
        &ControlBody::JoinAccepted(JoinAccepted {
            assigned_id: id,
            data_port: state.data_port,
            participant_count: count,
        }),
    );

    tracing::info!(
        participant_id = %id,
        name = %display_name,
        count,
        "participant joined"
    );
    state.events.joined(display_name.clone());
    state
        .events
        .status(format!("{display_name} joined ({count} total)"));
    broadcast(
        state,
        &ControlBody::ParticipantJoined(ParticipantNotice {
            display_name: display_name.clone(),
        }),
        id,
    );

    Some(display_name)
}

/// Records where the participant receives audio: the control
/// connection's IP with the announced UDP port.
fn set_audio_addr(
    peer: SocketAddr,
    state: &ServerState,
    id: ParticipantId,
    display_name: &str,
    ready: &AudioReady,
) {
    let addr = SocketAddr::new(peer.ip(), ready.data_port);
    match state.registry.set_audio_addr(id, addr) {
        Ok(()) => {
            tracing::info!(
                participant_id = %id,
                %addr,
                sample_rate = ready.sample_rate,
                channels = ready.channels,
                "audio ready"
            );
            state.events.status(format!("{display_name} audio ready"));
        }
        Err(e) => {
            tracing::warn!(
                participant_id = %id,
                %addr,
                error = %e,
                "audio-ready refused"
            );
        }
    }
}

/// Queues one message for this connection.
fn send(
    state: &ServerState,
    id: ParticipantId,
    link: &ControlLink,
    body: &ControlBody,
) {
    match encode_frame(&state.codec, body) {
        Ok(frame) => {
            if !link.send(frame) {
                tracing::debug!(
                    participant_id = %id,
                    kind = %body.kind(),
                    "connection gone, message dropped"
                );
            }
        }
        Err(e) => {
            tracing::warn!(participant_id = %id, error = %e, "failed to encode message");
        }
    }
}

/// Queues one pre-encoded frame for every live member except `except`.
///
/// Never waits on a peer. A member whose disconnect has begun gets
/// nothing more, even while it is still registered.
fn broadcast(
    state: &ServerState,
    body: &ControlBody,
    except: ParticipantId,
) {
    let frame = match encode_frame(&state.codec, body) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(kind = %body.kind(), error = %e, "failed to encode broadcast");
            return;
        }
    };

    for member in state.registry.snapshot() {
        if member.id == except || !member.is_live() {
            continue;
        }
        if !member.link.send(frame.clone()) {
            tracing::warn!(
                participant_id = %member.id,
                kind = %body.kind(),
                "broadcast send failed"
            );
            state.events.status(format!(
                "Failed to send message to {}: connection closed",
                member.display_name
            ));
        }
    }
}

fn encode_frame(
    codec: &JsonCodec,
    body: &ControlBody,
) -> Result<Bytes, ProtocolError> {
    let message = ControlMessage::from_body(body)?;
    Ok(Bytes::from(codec.encode(&message)?))
}

/// Writes queued frames in order, then closes the write side once every
/// sender is gone.
async fn write_loop(
    conn: Arc<TcpConnection>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = conn.send(&frame).await {
            tracing::debug!(conn_id = %conn.id(), error = %e, "write failed");
            return;
        }
    }
    if let Err(e) = conn.close().await {
        tracing::debug!(conn_id = %conn.id(), error = %e, "close failed");
    }
}

#[cfg(test)]
mod tests {
    use pocket_session::{EventEmitter, Registry, SessionEvent, SessionPassword};

    use super::*;

    fn test_state() -> (ServerState, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = EventEmitter::channel();
        let state = ServerState {
            registry: Arc::new(Registry::new()),
            auth: Arc::new(SessionPassword::new("")),
            codec: JsonCodec,
            events,
            data_port: 0,
            join_timeout: Duration::from_secs(10),
        };
        (state, events_rx)
    }

    fn register(
        state: &ServerState,
        id: u64,
        name: &str,
    ) -> (ControlLink, mpsc::UnboundedReceiver<Bytes>) {
        let (link, outbound) = ControlLink::new(CancellationToken::new());
        state
            .registry
            .add(Participant::new(ParticipantId(id), name, link.clone()))
            .unwrap();
        (link, outbound)
    }

    fn left_notice(name: &str) -> ControlBody {
        ControlBody::ParticipantLeft(ParticipantNotice {
            display_name: name.into(),
        })
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let (state, _events) = test_state();
        let (_a, mut a_out) = register(&state, 1, "Alice");
        let (_b, mut b_out) = register(&state, 2, "Bob");

        broadcast(&state, &left_notice("Carol"), ParticipantId(1));

        assert!(a_out.try_recv().is_err());
        let frame = b_out.try_recv().expect("Bob should get the notice");
        let message: ControlMessage = JsonCodec.decode(&frame).unwrap();
        assert_eq!(message.body().unwrap(), left_notice("Carol"));
    }

    #[test]
    fn test_broadcast_skips_member_being_disconnected() {
        let (state, mut events) = test_state();
        let (bob, mut bob_out) = register(&state, 2, "Bob");
        let (_carol, mut carol_out) = register(&state, 3, "Carol");

        bob.disconnect();
        broadcast(&state, &left_notice("Alice"), ParticipantId(1));

        assert!(bob_out.try_recv().is_err(), "Bob is still registered but closing");
        assert!(carol_out.try_recv().is_ok());
        // Skipping is not a send failure.
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_report_disconnect_names_member() {
        let (state, mut events) = test_state();
        let phase = Phase::Member {
            display_name: "Carol".into(),
        };
        let e = PocketError::JoinTimeout(Duration::from_secs(1));

        report_disconnect(&state, ParticipantId(4), &phase, &e);

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Status(format!("Client Carol disconnected: {e}"))
        );
    }
}
