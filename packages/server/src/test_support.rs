//! Helpers shared by unit tests across layers.

use std::{sync::Arc, time::Duration};

use tokio::io::{AsyncReadExt, DuplexStream, duplex};

use crate::{
    domain::{Envelope, UserId},
    infrastructure::{
        Connection,
        codec::{Frame, FrameBuffer, OpCode},
    },
};

const PEER_BUFFER: usize = 64 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// The client end of an in-memory connection.
pub(crate) struct Peer {
    stream: DuplexStream,
    buffer: FrameBuffer,
}

impl Peer {
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = self.buffer.next_frame().unwrap() {
                return Some(frame);
            }
            let n = tokio::time::timeout(READ_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .ok()?
                .ok()?;
            if n == 0 {
                return None;
            }
            self.buffer.extend(&chunk[..n]);
        }
    }

    pub(crate) async fn next_envelope(&mut self) -> Envelope {
        let frame = self.next_frame().await.expect("expected a frame");
        assert_eq!(frame.opcode, OpCode::Text);
        Envelope::parse(std::str::from_utf8(&frame.payload).unwrap()).unwrap()
    }

    /// True when nothing arrives within `wait`.
    pub(crate) async fn is_silent_for(&mut self, wait: Duration) -> bool {
        if !self.buffer.is_empty() {
            return false;
        }
        let mut chunk = [0u8; 1];
        !matches!(
            tokio::time::timeout(wait, self.stream.read(&mut chunk)).await,
            Ok(Ok(n)) if n > 0
        )
    }
}

/// A connection for `user_id` whose frames can be read from the returned peer.
pub(crate) fn duplex_connection(user_id: i64) -> (Arc<Connection>, Peer) {
    let (client, server) = duplex(PEER_BUFFER);
    let connection = Arc::new(Connection::new(UserId::new(user_id), server));
    let peer = Peer {
        stream: client,
        buffer: FrameBuffer::new(1 << 20),
    };
    (connection, peer)
}
