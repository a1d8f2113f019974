//! Real-time messaging gateway library.
//!
//! Accepts WebSocket connections over raw TCP, authenticates each one with a
//! token presented during the upgrade, and routes JSON envelopes between
//! application handlers and every device a user has connected.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;

#[cfg(test)]
mod test_support;

pub use config::GatewayConfig;
pub use ui::{Gateway, GatewayError};
