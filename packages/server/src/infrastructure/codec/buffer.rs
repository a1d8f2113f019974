//! Per-connection receive buffer.
//!
//! TCP does not preserve message boundaries: one read may hold half a frame
//! or several frames. Bytes are accumulated here and a frame is only decoded
//! once its declared length is fully available.

use bytes::{Buf, BytesMut};

use super::frame::{Frame, FrameError, decode_frame};

const INITIAL_CAPACITY: usize = 8 * 1024;

#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_payload: usize,
}

impl FrameBuffer {
    /// Create an empty buffer rejecting frames whose payload exceeds `max_payload`.
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_payload,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode and consume the first complete frame, if any.
    ///
    /// Consuming moves the read cursor instead of shifting the remaining bytes,
    /// so a read holding many frames is drained in linear time.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        match decode_frame(&self.buf, self.max_payload)? {
            Some((frame, consumed)) => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
