//! WebSocket frame codec (RFC 6455 §5).
//!
//! - `frame`: frame types, decoding of one frame, encoding of server frames
//! - `buffer`: per-connection receive buffer that reassembles frames split
//!   across socket reads

pub mod buffer;
pub mod frame;

pub use buffer::FrameBuffer;
pub use frame::{
    CloseCode, Frame, FrameError, OpCode, decode_frame, encode_close, encode_frame,
    encode_frame_masked, encode_ping, encode_pong, encode_text, parse_close_payload,
};
