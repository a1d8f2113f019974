//! Domain-level error types.

use thiserror::Error;

/// Credential verification failure.
///
/// Every variant ends the connection with a policy-violation close frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Neither a `token` query parameter nor a bearer header was presented
    #[error("no credential presented")]
    MissingToken,

    /// The token could not be decoded or its signature did not verify
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The token verified but its expiry is in the past
    #[error("token expired")]
    Expired,
}

/// Failure to write a frame to one connection.
///
/// Delivery reports these as `false`. Only [`SendError::Timeout`] asks the
/// connection to close; otherwise it is left for its read loop to close.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection was already closed
    #[error("connection closed")]
    Closed,

    /// The peer did not accept the frame in time; the connection is closed
    #[error("write did not complete within {0:?}")]
    Timeout(std::time::Duration),

    /// The socket write failed
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}
