//! HTTP Upgrade negotiation (RFC 6455 §4.2).
//!
//! Exactly one HTTP response is written per handshake: `101 Switching
//! Protocols` on success, or `400 Bad Request` when the client asks for a
//! protocol version other than 13. Every other failure closes the socket
//! without a response.

use std::{sync::LazyLock, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use regex::Regex;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const SUPPORTED_VERSION: &str = "13";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 1024;

const VERSION_REJECTED_BODY: &str = "Unsupported WebSocket version";

static ORIGIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*(?::([0-9]{1,5}))?$",
    )
    .expect("origin pattern is a valid regex")
});

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("unsupported Sec-WebSocket-Version: {0:?}")]
    UnsupportedVersion(Option<String>),

    #[error("malformed upgrade request: {0}")]
    MalformedRequest(&'static str),

    #[error("upgrade request exceeds {0} bytes")]
    RequestTooLarge(usize),

    #[error("upgrade request not received within {0:?}")]
    Timeout(Duration),

    #[error("peer closed the connection during the handshake")]
    ConnectionClosed,

    #[error("handshake I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Bounds applied while reading the upgrade request.
#[derive(Debug, Clone, Copy)]
pub struct HandshakeLimits {
    pub max_request_bytes: usize,
    pub timeout: Duration,
}

impl Default for HandshakeLimits {
    fn default() -> Self {
        Self {
            max_request_bytes: 8 * 1024,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Parsed request head of an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub method: String,
    pub target: String,
    headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// First value of header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// First value of query parameter `name` in the request target.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        let (_, query) = self.target.split_once('?')?;
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

/// Value sent back in `Access-Control-Allow-Origin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigin {
    Any,
    Exact(String),
}

impl AllowedOrigin {
    /// Echo a well-formed `Origin`; anything else falls back to `*`.
    pub fn resolve(origin: Option<&str>) -> Self {
        match origin {
            Some(origin) if is_valid_origin(origin) => AllowedOrigin::Exact(origin.to_string()),
            _ => AllowedOrigin::Any,
        }
    }

    pub fn header_value(&self) -> &str {
        match self {
            AllowedOrigin::Any => "*",
            AllowedOrigin::Exact(origin) => origin,
        }
    }

    /// Browsers reject credentials combined with a wildcard origin.
    pub fn allows_credentials(&self) -> bool {
        matches!(self, AllowedOrigin::Exact(_))
    }
}

/// Outcome of a successful negotiation.
#[derive(Debug)]
pub struct Handshake {
    pub request: HandshakeRequest,
    pub allowed_origin: AllowedOrigin,
    /// Bytes received after the request head; the start of the frame stream.
    pub leftover: Vec<u8>,
}

/// `base64(SHA1(key + GUID))`
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// `http`/`https` scheme, a host of DNS labels, an optional port, nothing else.
pub fn is_valid_origin(origin: &str) -> bool {
    let Some(captures) = ORIGIN_PATTERN.captures(origin) else {
        return false;
    };
    match captures.get(1) {
        Some(port) => port.as_str().parse::<u16>().is_ok(),
        None => true,
    }
}

/// Parse the request line and headers of an upgrade request head.
pub fn parse_request(head: &[u8]) -> Result<HandshakeRequest, HandshakeError> {
    let head = std::str::from_utf8(head)
        .map_err(|_| HandshakeError::MalformedRequest("request head is not UTF-8"))?;
    let mut lines = head.split("\r\n");

    let request_line = lines
        .next()
        .ok_or(HandshakeError::MalformedRequest("empty request"))?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HandshakeError::MalformedRequest("invalid request line"));
    };
    if method.is_empty() || target.is_empty() || !version.starts_with("HTTP/") {
        return Err(HandshakeError::MalformedRequest("invalid request line"));
    }

    let mut headers = Vec::new();
    for line in lines.take_while(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or(HandshakeError::MalformedRequest("header without colon"))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(HandshakeRequest {
        method: method.to_string(),
        target: target.to_string(),
        headers,
    })
}

/// Read the upgrade request from `reader` and answer it on `writer`.
pub async fn negotiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    limits: &HandshakeLimits,
) -> Result<Handshake, HandshakeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (head, leftover) = tokio::time::timeout(
        limits.timeout,
        read_request_head(reader, limits.max_request_bytes),
    )
    .await
    .map_err(|_| HandshakeError::Timeout(limits.timeout))??;

    let request = parse_request(&head)?;

    let key = match request.header("Sec-WebSocket-Key") {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => return Err(HandshakeError::MissingKey),
    };

    match request.header("Sec-WebSocket-Version") {
        Some(SUPPORTED_VERSION) => {}
        other => {
            let version = other.map(str::to_string);
            writer.write_all(version_rejected_response().as_bytes()).await?;
            writer.flush().await?;
            return Err(HandshakeError::UnsupportedVersion(version));
        }
    }

    let allowed_origin = AllowedOrigin::resolve(request.header("Origin"));
    writer
        .write_all(switching_protocols_response(&key, &allowed_origin).as_bytes())
        .await?;
    writer.flush().await?;

    Ok(Handshake {
        request,
        allowed_origin,
        leftover,
    })
}

/// Accumulate bytes until the blank line ending the request head.
async fn read_request_head<R>(
    reader: &mut R,
    max_request_bytes: usize,
) -> Result<(Vec<u8>, Vec<u8>), HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let mut received = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(HandshakeError::ConnectionClosed);
        }
        // The terminator may straddle the previous chunk.
        let search_from = received.len().saturating_sub(HEAD_TERMINATOR.len() - 1);
        received.extend_from_slice(&chunk[..n]);

        if let Some(pos) = received[search_from..]
            .windows(HEAD_TERMINATOR.len())
            .position(|window| window == HEAD_TERMINATOR)
        {
            let head_end = search_from + pos + HEAD_TERMINATOR.len();
            if head_end > max_request_bytes {
                return Err(HandshakeError::RequestTooLarge(max_request_bytes));
            }
            let leftover = received.split_off(head_end);
            return Ok((received, leftover));
        }
        if received.len() > max_request_bytes {
            return Err(HandshakeError::RequestTooLarge(max_request_bytes));
        }
    }
}

fn switching_protocols_response(key: &str, allowed_origin: &AllowedOrigin) -> String {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         Access-Control-Allow-Origin: {}\r\n",
        compute_accept_key(key),
        allowed_origin.header_value()
    );
    if allowed_origin.allows_credentials() {
        response.push_str("Access-Control-Allow-Credentials: true\r\n");
    }
    response.push_str("\r\n");
    response
}

fn version_rejected_response() -> String {
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Sec-WebSocket-Version: {}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        SUPPORTED_VERSION,
        VERSION_REJECTED_BODY.len(),
        VERSION_REJECTED_BODY
    )
}
