//! Frame layout, decoding and encoding.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key (0 or 4 bytes, present when MASK is set)      |
//! +---------------------------------------------------------------+
//! |                         Payload Data                          |
//! +---------------------------------------------------------------+
//! ```

use thiserror::Error;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_BITS: u8 = 0x0F;
const LENGTH_BITS: u8 = 0x7F;
const LENGTH_16_MARKER: u8 = 126;
const LENGTH_64_MARKER: u8 = 127;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(FrameError::ReservedOpcode(other)),
        }
    }
}

/// Close status code (RFC 6455 §7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
    pub const NORMAL: Self = Self(1000);
    pub const GOING_AWAY: Self = Self(1001);
    pub const PROTOCOL_ERROR: Self = Self(1002);
    pub const POLICY_VIOLATION: Self = Self(1008);
    pub const MESSAGE_TOO_BIG: Self = Self(1009);

    /// Whether this code may appear in a close frame on the wire.
    ///
    /// 1005, 1006 and 1015 are reserved for local reporting only.
    pub fn is_sendable(self) -> bool {
        matches!(self.0, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

/// One decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

/// A frame that cannot be decoded at all.
///
/// The stream cannot be resynchronised after any of these, so the connection
/// is closed with [`FrameError::close_code`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("declared payload of {declared} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { declared: u64, limit: usize },

    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),

    #[error("invalid control frame: {0}")]
    InvalidControlFrame(&'static str),
}

impl FrameError {
    pub fn close_code(&self) -> CloseCode {
        match self {
            FrameError::PayloadTooLarge { .. } => CloseCode::MESSAGE_TOO_BIG,
            FrameError::ReservedOpcode(_) | FrameError::InvalidControlFrame(_) => {
                CloseCode::PROTOCOL_ERROR
            }
        }
    }
}

/// Decode the first frame in `buf`.
///
/// Returns `Ok(None)` while `buf` does not yet hold the complete header and
/// declared payload; otherwise the frame and the number of bytes it occupied.
pub fn decode_frame(buf: &[u8], max_payload: usize) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & FIN_BIT != 0;
    let opcode = OpCode::try_from(buf[0] & OPCODE_BITS)?;
    let masked = buf[1] & MASK_BIT != 0;

    let (declared, mut offset) = match buf[1] & LENGTH_BITS {
        LENGTH_16_MARKER => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        LENGTH_64_MARKER => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut length = [0u8; 8];
            length.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(length), 10)
        }
        short => (u64::from(short), 2),
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::InvalidControlFrame("fragmented control frame"));
        }
        if declared > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::InvalidControlFrame("control payload over 125 bytes"));
        }
    }
    if declared > max_payload as u64 {
        return Err(FrameError::PayloadTooLarge {
            declared,
            limit: max_payload,
        });
    }
    let length = declared as usize;

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < offset + length {
        return Ok(None);
    }

    let mut payload = buf[offset..offset + length].to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload,
        },
        offset + length,
    )))
}

/// Encode a server frame: FIN set, never masked, minimal length encoding.
pub fn encode_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    encode(opcode, payload, None)
}

/// Encode a client frame masked with `key`.
pub fn encode_frame_masked(opcode: OpCode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    encode(opcode, payload, Some(key))
}

pub fn encode_text(text: &str) -> Vec<u8> {
    encode_frame(OpCode::Text, text.as_bytes())
}

pub fn encode_ping(payload: &[u8]) -> Vec<u8> {
    encode_frame(OpCode::Ping, payload)
}

pub fn encode_pong(payload: &[u8]) -> Vec<u8> {
    encode_frame(OpCode::Pong, payload)
}

/// Encode a close frame. `reason` is cut at a character boundary so the
/// payload stays within the control frame limit.
pub fn encode_close(code: CloseCode, reason: &str) -> Vec<u8> {
    let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }

    let mut payload = Vec::with_capacity(2 + end);
    payload.extend_from_slice(&code.0.to_be_bytes());
    payload.extend_from_slice(&reason.as_bytes()[..end]);
    encode_frame(OpCode::Close, &payload)
}

/// Split a close frame payload into its status code and reason.
///
/// An empty payload carries no status; a one-byte payload is malformed.
pub fn parse_close_payload(payload: &[u8]) -> Option<(CloseCode, String)> {
    if payload.len() < 2 {
        return None;
    }
    let code = CloseCode(u16::from_be_bytes([payload[0], payload[1]]));
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    Some((code, reason))
}

fn encode(opcode: OpCode, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(FIN_BIT | opcode.as_u8());

    match payload.len() {
        len if len <= 125 => out.push(mask_bit | len as u8),
        len if len <= u16::MAX as usize => {
            out.push(mask_bit | LENGTH_16_MARKER);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(mask_bit | LENGTH_64_MARKER);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }

    out
}

fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}
