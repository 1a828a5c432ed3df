//! Client side of a session: join over the control channel, then send and
//! receive audio over UDP.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use pocket_protocol::{
    AudioPacket, AudioReady, Codec, ControlBody, ControlMessage, JoinAccepted,
    JoinRequest, JsonCodec, ParticipantId,
};
use pocket_session::{EventEmitter, SessionEvent};
use pocket_transport::{
    Connection, DEFAULT_MAX_FRAME_LEN, TcpConnection, TransportError,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::PocketError;
use crate::config::host_port;

/// How long [`PocketClient::connect`] waits for the server's answer.
const JOIN_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest datagram [`PocketClient::recv_audio`] accepts.
const RECV_BUFFER_LEN: usize = 64 * 1024;

/// A joined session member.
///
/// Notices from the server (someone joined or left) and status lines show
/// up on [`events`](Self::events). Audio goes through
/// [`send_audio`](Self::send_audio) and [`recv_audio`](Self::recv_audio).
pub struct PocketClient {
    conn: Arc<TcpConnection>,
    codec: JsonCodec,
    audio: Option<UdpSocket>,
    participant_id: ParticipantId,
    participant_count: usize,
    sequence: AtomicU32,
    events: EventEmitter,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl PocketClient {
    /// Connects, joins, and announces a fresh UDP socket for audio.
    ///
    /// # Errors
    /// - [`PocketError::Rejected`] with the server's reason if the join is
    ///   refused.
    /// - [`PocketError::JoinTimeout`] if the server doesn't answer.
    /// - A transport error if the server can't be reached or hangs up.
    pub async fn connect(
        address: &str,
        port: u16,
        username: &str,
        password: &str,
        session_name: &str,
    ) -> Result<Self, PocketError> {
        let (events, events_rx) = EventEmitter::channel();
        let codec = JsonCodec;

        let conn = match TcpConnection::connect(
            &host_port(address, port),
            DEFAULT_MAX_FRAME_LEN,
        )
        .await
        {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                events.status(format!("Connection failed: {e}"));
                return Err(e.into());
            }
        };

        let join = ControlBody::Join(JoinRequest {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            session_name: Some(session_name.to_string()),
        });
        send_body(&conn, &codec, &join).await?;

        let accepted = match tokio::time::timeout(
            JOIN_RESPONSE_TIMEOUT,
            await_join_response(&conn, &codec, &events),
        )
        .await
        {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                // Closing is best-effort; the join already failed.
                let _ = conn.close().await;
                return Err(e);
            }
            Err(_) => {
                let _ = conn.close().await;
                return Err(PocketError::JoinTimeout(JOIN_RESPONSE_TIMEOUT));
            }
        };

        // Audio goes to the host we reached over TCP, on the advertised port.
        let server_audio =
            SocketAddr::new(conn.peer_addr().ip(), accepted.data_port);
        let local: SocketAddr = if server_audio.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let audio = UdpSocket::bind(local).await?;
        audio.connect(server_audio).await?;
        let data_port = audio.local_addr()?.port();

        send_body(&conn, &codec, &ControlBody::AudioReady(AudioReady::new(data_port)))
            .await?;

        tracing::info!(
            participant_id = %accepted.assigned_id,
            participants = accepted.participant_count,
            %server_audio,
            data_port,
            "joined session"
        );
        events.status(format!(
            "Connected! ({} participants)",
            accepted.participant_count
        ));

        let closed = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        tokio::spawn(listen(
            Arc::clone(&conn),
            codec,
            events.clone(),
            Arc::clone(&closed),
            cancel.clone(),
        ));

        Ok(Self {
            conn,
            codec,
            audio: Some(audio),
            participant_id: accepted.assigned_id,
            participant_count: accepted.participant_count,
            sequence: AtomicU32::new(0),
            events,
            events_rx,
            closed,
            cancel,
        })
    }

    /// The id the server assigned.
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    /// Member count reported in the join response, this client included.
    pub fn participant_count_at_join(&self) -> usize {
        self.participant_count
    }

    /// Local UDP port audio is received on. `None` after disconnect.
    pub fn data_port(&self) -> Option<u16> {
        let audio = self.audio.as_ref()?;
        audio.local_addr().ok().map(|addr| addr.port())
    }

    /// Participant notices and status lines, in arrival order.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<SessionEvent> {
        &mut self.events_rx
    }

    /// Sends one audio packet to the relay, stamped with the current time
    /// and the next sequence number.
    pub async fn send_audio(&self, payload: impl Into<Bytes>) -> Result<(), PocketError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let packet = AudioPacket::new(
            chrono::Utc::now().timestamp_millis(),
            sequence,
            payload,
        );
        self.audio_socket()?.send(&packet.encode()).await?;
        Ok(())
    }

    /// Waits for the next relayed packet. Malformed datagrams are skipped.
    pub async fn recv_audio(&self) -> Result<AudioPacket, PocketError> {
        let audio = self.audio_socket()?;
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        loop {
            let (len, from) = audio.recv_from(&mut buf).await?;
            match AudioPacket::decode(&buf[..len]) {
                Ok(packet) => return Ok(packet.with_sender(from)),
                Err(e) => {
                    tracing::trace!(%from, error = %e, "skipping malformed audio packet");
                }
            }
        }
    }

    /// Sends `leave`, closes both sockets, and reports `Disconnected`.
    /// Calling it again does nothing.
    pub async fn disconnect(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        if let Err(e) = send_body(&self.conn, &self.codec, &ControlBody::Leave).await {
            tracing::debug!(error = %e, "failed to send leave");
        }
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "failed to close control connection");
        }
        self.audio = None;

        tracing::info!(participant_id = %self.participant_id, "disconnected");
        self.events.status("Disconnected");
    }

    fn audio_socket(&self) -> Result<&UdpSocket, PocketError> {
        self.audio.as_ref().ok_or_else(|| {
            TransportError::ConnectionClosed("client disconnected".into()).into()
        })
    }
}

impl Drop for PocketClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn send_body(
    conn: &TcpConnection,
    codec: &JsonCodec,
    body: &ControlBody,
) -> Result<(), PocketError> {
    let message = ControlMessage::from_body(body)?;
    conn.send(&codec.encode(&message)?).await?;
    Ok(())
}

/// Reads until the server accepts or rejects the join. Notices that race
/// ahead of the answer are still delivered.
async fn await_join_response(
    conn: &TcpConnection,
    codec: &JsonCodec,
    events: &EventEmitter,
) -> Result<JoinAccepted, PocketError> {
    loop {
        let Some(data) = conn.recv().await? else {
            return Err(TransportError::ConnectionClosed(
                "server closed the connection before answering the join".into(),
            )
            .into());
        };
        let message: ControlMessage = codec.decode(&data)?;
        match message.body()? {
            ControlBody::JoinAccepted(accepted) => return Ok(accepted),
            ControlBody::JoinRejected(rejected) => {
                tracing::info!(reason = %rejected.reason_text, "join rejected");
                events.status(format!("Join rejected: {}", rejected.reason_text));
                return Err(PocketError::Rejected(rejected.reason_text));
            }
            ControlBody::ParticipantJoined(notice) => events.joined(notice.display_name),
            ControlBody::ParticipantLeft(notice) => events.left(notice.display_name),
            other => {
                tracing::debug!(kind = %other.kind(), "ignoring message before join response");
            }
        }
    }
}

/// Turns server notices into events until the connection ends or the
/// client disconnects.
async fn listen(
    conn: Arc<TcpConnection>,
    codec: JsonCodec,
    events: EventEmitter,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            received = conn.recv() => received,
        };

        let data = match received {
            Ok(Some(data)) => data,
            Ok(None) => break,
            Err(e) => {
                events.status(format!("Connection error: {e}"));
                break;
            }
        };

        let body = match codec
            .decode::<ControlMessage>(&data)
            .and_then(|message| message.body())
        {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed control message");
                continue;
            }
        };

        match body {
            ControlBody::ParticipantJoined(notice) => events.joined(notice.display_name),
            ControlBody::ParticipantLeft(notice) => events.left(notice.display_name),
            other => {
                tracing::debug!(kind = %other.kind(), "ignoring control message");
            }
        }
    }

    // The server hung up first.
    if !closed.swap(true, Ordering::SeqCst) {
        tracing::info!("server closed the connection");
        events.status("Disconnected");
    }
}
