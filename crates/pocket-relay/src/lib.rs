//! Audio fan-out for Pocket.
//!
//! The relay owns the data-channel UDP socket and runs one loop:
//!
//! ```text
//! recv_from
//!     │
//!     ▼
//! AudioPacket::decode        malformed → drop
//!     │
//!     ▼
//! Registry::find_by_audio_addr   unknown sender → drop
//!     │
//!     ▼
//! send_to every other live member with an audio address
//! ```
//!
//! Nothing is retransmitted, reordered, or rate limited. Audio never
//! touches the control channel.

mod error;
mod stats;

pub use error::RelayError;
pub use stats::{RelayStats, RelayStatsSnapshot};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pocket_protocol::{AudioPacket, ParticipantId};
use pocket_session::{EventEmitter, Registry};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Receive buffer size. Large enough for any UDP datagram over IPv4.
const RECV_BUFFER_LEN: usize = 64 * 1024;

/// Pause after a receive error so a persistent failure can't spin.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// The bound data-channel socket plus what the loop needs to route.
pub struct AudioRelay {
    socket: UdpSocket,
    registry: Arc<Registry>,
    events: EventEmitter,
    stats: Arc<RelayStats>,
}

impl AudioRelay {
    /// Binds the UDP socket. The loop doesn't start until [`run`](Self::run).
    pub async fn bind(
        addr: &str,
        registry: Arc<Registry>,
        events: EventEmitter,
    ) -> Result<Self, RelayError> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| {
            RelayError::Bind {
                addr: addr.to_string(),
                source,
            }
        })?;
        tracing::info!(addr, "UDP relay bound");
        Ok(Self {
            socket,
            registry,
            events,
            stats: Arc::new(RelayStats::default()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Shared handle to the relay's counters.
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Runs the receive loop until `cancel` fires. The socket is closed
    /// when this returns.
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        tracing::debug!("relay loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "UDP receive failed");
                        self.events.status(format!("UDP audio error: {e}"));
                        tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        tracing::debug!("relay loop stopped");
    }

    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        self.stats.record_received();

        let packet = match AudioPacket::decode(data) {
            Ok(packet) => packet.with_sender(from),
            Err(e) => {
                tracing::trace!(%from, error = %e, "dropping malformed audio packet");
                self.stats.record_dropped();
                return;
            }
        };

        let Some(sender) = self.registry.find_by_audio_addr(from) else {
            tracing::trace!(%from, "dropping audio from unregistered address");
            self.stats.record_dropped();
            return;
        };

        let sent = self.fan_out(&packet, sender.id).await;
        self.stats.record_forwarded(sent);
        tracing::trace!(
            participant_id = %sender.id,
            sequence = packet.sequence,
            recipients = sent,
            "audio relayed"
        );
    }

    /// Sends `packet` to every live member with an audio address except
    /// `sender`. Returns how many sends succeeded.
    async fn fan_out(&self, packet: &AudioPacket, sender: ParticipantId) -> u64 {
        let frame = packet.encode();
        let mut sent = 0;

        for member in self.registry.snapshot() {
            if member.id == sender || !member.is_live() {
                continue;
            }
            let Some(to) = member.audio_addr else {
                continue;
            };
            match self.socket.send_to(&frame, to).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    tracing::warn!(
                        participant_id = %member.id,
                        %to,
                        error = %e,
                        "audio send failed"
                    );
                    self.events.status(format!(
                        "Failed to relay audio to {}: {e}",
                        member.display_name
                    ));
                }
            }
        }
        sent
    }
}
