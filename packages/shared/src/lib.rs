//! Utilities shared by the Pulse gateway library and its binaries.

pub mod logger;
pub mod time;
