//! Domain layer: identifiers, the message envelope and the contracts the
//! gateway consumes from the surrounding application.
//!
//! Nothing in this module performs I/O. The infrastructure and usecase layers
//! depend on these types; this layer depends on neither.

pub mod auth;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod value_object;

pub use auth::{AuthenticatedUser, Authenticator};
#[cfg(test)]
pub use auth::MockAuthenticator;
pub use envelope::{Envelope, USER_OFFLINE, USER_ONLINE};
pub use error::{AuthError, SendError};
pub use handler::{DisconnectHandler, MessageHandler, disconnect_handler_fn, handler_fn};
pub use value_object::{ConnectionId, UserId};
