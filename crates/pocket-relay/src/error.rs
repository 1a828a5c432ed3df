/// Errors that can occur setting up the audio relay.
///
/// Once running, the relay never fails: bad datagrams are dropped and
/// socket errors are reported as status events.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The UDP socket could not be bound.
    #[error("bind to {addr} failed: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
