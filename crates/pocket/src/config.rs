//! Server configuration.

use std::time::Duration;

use pocket_transport::DEFAULT_MAX_FRAME_LEN;
use serde::Deserialize;

/// Network and timing settings for a coordinator.
///
/// Every field has a default, so a config file only needs the keys it
/// changes:
///
/// ```toml
/// control_port = 9000
/// join_timeout_secs = 5
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface both sockets bind to.
    pub bind_host: String,
    /// TCP port for the control channel. 0 lets the OS pick.
    pub control_port: u16,
    /// UDP port for audio. 0 lets the OS pick.
    pub data_port: u16,
    /// How long a new connection may wait before sending `join`.
    pub join_timeout_secs: u64,
    /// Largest control frame accepted, in bytes.
    pub max_frame_len: usize,
    /// How long `stop` waits for connections to finish cleanup.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            control_port: 8080,
            data_port: 8081,
            join_timeout_secs: 10,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            shutdown_grace_ms: 2000,
        }
    }
}

impl ServerConfig {
    pub fn control_bind_addr(&self) -> String {
        host_port(&self.bind_host, self.control_port)
    }

    pub fn data_bind_addr(&self) -> String {
        host_port(&self.bind_host, self.data_port)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Joins a host and port into something `bind`/`connect` accept. Bare
/// IPv6 literals get brackets.
pub(crate) fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports_and_timeouts() {
        let config = ServerConfig::default();
        assert_eq!(config.control_bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.data_bind_addr(), "0.0.0.0:8081");
        assert_eq!(config.join_timeout(), Duration::from_secs(10));
        assert_eq!(config.max_frame_len, 65536);
        assert_eq!(config.shutdown_grace(), Duration::from_millis(2000));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            bind_host = "127.0.0.1"
            control_port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.control_bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.data_port, 8081);
        assert_eq!(config.join_timeout_secs, 10);
    }

    #[test]
    fn test_host_port_brackets_ipv6() {
        assert_eq!(host_port("::1", 80), "[::1]:80");
        assert_eq!(host_port("[::1]", 80), "[::1]:80");
        assert_eq!(host_port("localhost", 80), "localhost:80");
    }
}
