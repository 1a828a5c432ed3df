//! `SessionCoordinator` builder and the running [`SessionHandle`].
//!
//! This is the entry point for hosting a session. It ties the layers
//! together: transport → protocol → session, with the audio relay running
//! beside the control channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pocket_protocol::{JsonCodec, ParticipantId};
use pocket_relay::{AudioRelay, RelayStats, RelayStatsSnapshot};
use pocket_session::{
    Authenticator, EventEmitter, Registry, SessionConfig, SessionEvent,
};
use pocket_transport::{Transport, TcpTransport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::handler::handle_connection;
use crate::{PocketError, ServerConfig};

/// Pause after a failed accept so a persistent error can't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) registry: Arc<Registry>,
    pub(crate) auth: Arc<dyn Authenticator>,
    pub(crate) codec: JsonCodec,
    pub(crate) events: EventEmitter,
    /// The bound UDP port, advertised in `join_accepted`.
    pub(crate) data_port: u16,
    pub(crate) join_timeout: Duration,
}

/// Builder for configuring and starting a session.
///
/// # Example
///
/// ```rust,no_run
/// use pocket::prelude::*;
///
/// # async fn run() -> Result<(), PocketError> {
/// let mut handle = SessionCoordinator::new("Jam")
///     .password("xyz")
///     .control_port(9000)
///     .start()
///     .await?;
///
/// while let Some(event) = handle.events().recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct SessionCoordinator {
    session: SessionConfig,
    config: ServerConfig,
    auth: Option<Arc<dyn Authenticator>>,
}

impl SessionCoordinator {
    /// Creates a coordinator for an open session called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            session: SessionConfig::new(name, ""),
            config: ServerConfig::default(),
            auth: None,
        }
    }

    /// Creates a coordinator from a full session description.
    pub fn with_session(session: SessionConfig) -> Self {
        Self {
            session,
            config: ServerConfig::default(),
            auth: None,
        }
    }

    /// Requires joins to supply `password`. Empty means open.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.session.password = password.into();
        self
    }

    /// Replaces the password check with a custom admission rule.
    pub fn authenticator(mut self, auth: impl Authenticator) -> Self {
        self.auth = Some(Arc::new(auth));
        self
    }

    /// Replaces all network and timing settings.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.config.bind_host = host.into();
        self
    }

    pub fn control_port(mut self, port: u16) -> Self {
        self.config.control_port = port;
        self
    }

    pub fn data_port(mut self, port: u16) -> Self {
        self.config.data_port = port;
        self
    }

    /// Binds both sockets and starts accepting participants.
    ///
    /// Returns once both sockets are bound. If either bind fails, nothing
    /// stays bound.
    pub async fn start(self) -> Result<SessionHandle, PocketError> {
        let Self {
            session,
            config,
            auth,
        } = self;

        let transport = TcpTransport::bind(&config.control_bind_addr())
            .await?
            .with_max_frame_len(config.max_frame_len);
        let control_addr = transport.local_addr()?;

        let registry = Arc::new(Registry::new());
        let (events, events_rx) = EventEmitter::channel();

        // `transport` is dropped (and its port released) if this fails.
        let relay = AudioRelay::bind(
            &config.data_bind_addr(),
            Arc::clone(&registry),
            events.clone(),
        )
        .await?;
        let data_addr = relay.local_addr()?;
        let stats = relay.stats();

        let auth: Arc<dyn Authenticator> = match auth {
            Some(auth) => auth,
            None => Arc::new(session.authenticator()),
        };
        let state = Arc::new(ServerState {
            registry,
            auth,
            codec: JsonCodec,
            events: events.clone(),
            data_port: data_addr.port(),
            join_timeout: config.join_timeout(),
        });

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(relay.run(cancel.child_token()));
        tracker.spawn(accept_loop(
            transport,
            Arc::clone(&state),
            cancel.clone(),
            tracker.clone(),
        ));

        tracing::info!(
            session = %session.name,
            %control_addr,
            %data_addr,
            password_required = !session.password.is_empty(),
            "session started"
        );
        events.status(format!(
            "Server started - TCP:{}, UDP:{}",
            control_addr.port(),
            data_addr.port()
        ));
        events.status(format!("Session: {}", session.name));

        Ok(SessionHandle {
            state,
            session,
            control_addr,
            data_addr,
            stats,
            events: events_rx,
            cancel,
            tracker,
            shutdown_grace: config.shutdown_grace(),
            stopped: AtomicBool::new(false),
        })
    }
}

/// Starts an open or password-protected session with default settings
/// (TCP 8080, UDP 8081 on all interfaces).
pub async fn start(
    session_name: impl Into<String>,
    password: impl Into<String>,
) -> Result<SessionHandle, PocketError> {
    SessionCoordinator::new(session_name)
        .password(password)
        .start()
        .await
}

/// Read-only view of one participant, for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSummary {
    pub id: ParticipantId,
    pub display_name: String,
    pub audio_addr: Option<SocketAddr>,
}

/// A running session.
///
/// Dropping the handle shuts the session down without waiting; call
/// [`stop`](Self::stop) to wait for participants to be cleaned up.
pub struct SessionHandle {
    state: Arc<ServerState>,
    session: SessionConfig,
    control_addr: SocketAddr,
    data_addr: SocketAddr,
    stats: Arc<RelayStats>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    shutdown_grace: Duration,
    stopped: AtomicBool,
}

impl SessionHandle {
    /// Notifications from the session, in the order they were produced.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<SessionEvent> {
        &mut self.events
    }

    pub fn session_name(&self) -> &str {
        &self.session.name
    }

    /// Where the control channel listens.
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Where the audio relay listens.
    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn participant_count(&self) -> usize {
        self.state.registry.count()
    }

    /// Current members, ordered by id.
    pub fn participants(&self) -> Vec<ParticipantSummary> {
        self.state
            .registry
            .snapshot()
            .into_iter()
            .map(|p| ParticipantSummary {
                id: p.id,
                display_name: p.display_name,
                audio_addr: p.audio_addr,
            })
            .collect()
    }

    pub fn relay_stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Disconnects every participant and closes both sockets.
    ///
    /// Waits up to the configured grace period for connections to finish
    /// their cleanup. Calling it again does nothing.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tracker.len(),
                "tasks still running after shutdown grace period"
            );
        }

        tracing::info!(session = %self.session.name, "session stopped");
        self.state.events.status("Server stopped");
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Accepts control connections until cancelled, spawning one handler
/// task per connection.
async fn accept_loop(
    mut transport: TcpTransport,
    state: Arc<ServerState>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = transport.accept() => accepted,
        };

        match accepted {
            Ok(conn) => {
                let state = Arc::clone(&state);
                let link_cancel = cancel.child_token();
                tracker.spawn(async move {
                    if let Err(e) = handle_connection(conn, state, link_cancel).await {
                        tracing::debug!(error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                state.events.status(format!("Error accepting client: {e}"));
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }

    tracing::debug!("accept loop stopped");
}
