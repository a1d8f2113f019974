//! Gateway configuration.

use std::time::Duration;

use crate::infrastructure::handshake::HandshakeLimits;

/// Runtime settings for one [`Gateway`](crate::ui::Gateway).
///
/// The binary builds this from command-line arguments; library users and
/// tests start from [`GatewayConfig::default`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to bind to (e.g., "127.0.0.1")
    pub host: String,
    /// Port to bind to; `0` picks an ephemeral port
    pub port: u16,
    /// Bounds on the upgrade request
    pub handshake: HandshakeLimits,
    /// Largest accepted frame payload
    pub max_message_bytes: usize,
    /// How often the server pings each connection; zero disables keepalive
    pub ping_interval: Duration,
    /// A connection that sends nothing for this long is closed; only checked
    /// while keepalive is enabled
    pub idle_timeout: Duration,
    /// Longest a single frame write may wait on a peer that is not reading
    pub write_timeout: Duration,
}

impl GatewayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            handshake: HandshakeLimits::default(),
            max_message_bytes: 1024 * 1024,
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            write_timeout: Duration::from_secs(10),
        }
    }
}
