//! Infrastructure layer: everything that touches bytes on the wire.
//!
//! - `codec`: WebSocket frame encoding/decoding and reassembly
//! - `handshake`: HTTP Upgrade negotiation
//! - `auth`: credential extraction and JWT verification
//! - `connection`: one transport plus its send lock
//! - `registry`: connection ↔ user index

pub mod auth;
pub mod codec;
pub mod connection;
pub mod handshake;
pub mod registry;

pub use connection::Connection;
pub use registry::{ConnectionRegistry, Unregistered};
