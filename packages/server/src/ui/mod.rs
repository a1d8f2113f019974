//! Transport-facing layer: listener, per-connection workers, shutdown.

mod error;
mod server;
mod session;
mod signal;
pub(crate) mod state;

pub use error::GatewayError;
pub use server::Gateway;
pub use signal::shutdown_signal;
