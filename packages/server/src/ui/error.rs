//! Listener-level errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The listening socket could not be bound; nothing is served
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
