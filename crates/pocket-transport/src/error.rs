/// Failures on the control channel's socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listening socket could not be bound.
    #[error("bind to {addr} failed: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The server could not be reached.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Used where an operation needs a live connection and there isn't one.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Writing a frame or shutting down the write half failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading failed, or the peer announced a frame over the size limit.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),
}
