//! Per-connection worker.
//!
//! One task per accepted socket runs the handshake, authenticates the
//! credential, registers the connection and then reads frames until the peer
//! leaves, a protocol error occurs, the connection goes idle or the gateway
//! shuts down. Messages from one connection are dispatched in arrival order.
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - 認証失敗時: 101 の後に 1008 でクローズされ、登録されない
//! - 受信フレームの処理: ping への pong、テキストのディスパッチ、ハンドシェイク直後に
//!   パイプラインされたフレーム、破棄されるフレーム（バイナリ・分割・不正な UTF-8）
//! - 終了条件: クライアントからのクローズ、上限超過、アイドルタイムアウト、クローズ要求
//!
//! ### なぜこのテストが必要か
//! - 接続ワーカーはレジストリへの登録と解除を担うため、どの終了経路でも
//!   登録が残らないことを保証する必要がある
//!
//! ### どのような状況を想定しているか
//! - TCP を使わず duplex 上でクライアントを模倣し、アイドルタイムアウトのような
//!   タイミング依存のケースを短い設定値で検証する
//! - キープアライブを無効化した設定（ping 間隔 0）でも接続が正常に終了する

use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::{
    domain::{AuthError, AuthenticatedUser, Authenticator},
    infrastructure::{
        Connection,
        auth::extract_token,
        codec::{
            CloseCode, Frame, FrameBuffer, FrameError, OpCode, encode_close, encode_ping,
            encode_pong, parse_close_payload,
        },
        handshake::{HandshakeRequest, negotiate},
    },
    ui::state::AppState,
};

const READ_CHUNK: usize = 8 * 1024;
const AUTH_FAILED_REASON: &str = "authentication failed";

/// Why the read loop stopped.
#[derive(Debug)]
enum SessionEnd {
    /// The peer sent a close frame, with its status code if any
    PeerClosed(Option<CloseCode>),
    /// The peer closed the TCP stream without a close frame
    Eof,
    ReadFailed(std::io::Error),
    Protocol(FrameError),
    IdleTimeout,
    /// [`Connection::request_close`] was called, usually by shutdown
    CloseRequested,
}

impl SessionEnd {
    /// Close frame to send back, or `None` when the peer is already gone.
    fn close_frame(&self) -> Option<(CloseCode, &'static str)> {
        match self {
            SessionEnd::PeerClosed(Some(code)) if code.is_sendable() => Some((*code, "")),
            SessionEnd::PeerClosed(_) => Some((CloseCode::NORMAL, "")),
            SessionEnd::Protocol(FrameError::PayloadTooLarge { .. }) => {
                Some((CloseCode::MESSAGE_TOO_BIG, "message too big"))
            }
            SessionEnd::Protocol(e) => Some((e.close_code(), "protocol error")),
            SessionEnd::IdleTimeout => Some((CloseCode::GOING_AWAY, "idle timeout")),
            SessionEnd::CloseRequested => Some((CloseCode::GOING_AWAY, "server shutting down")),
            SessionEnd::Eof | SessionEnd::ReadFailed(_) => None,
        }
    }
}

/// Serve one accepted stream until it closes.
pub(crate) async fn handle_connection<S>(stream: S, peer: SocketAddr, state: Arc<AppState>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let handshake = match negotiate(&mut reader, &mut writer, &state.config.handshake).await {
        Ok(handshake) => handshake,
        Err(e) => {
            tracing::info!(%peer, "Handshake rejected: {}", e);
            return;
        }
    };

    let user = match authenticate(&handshake.request, state.authenticator.as_ref()).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(%peer, "Authentication failed: {}", e);
            reject(&mut writer).await;
            return;
        }
    };

    let connection = Arc::new(
        Connection::new(user.user_id, writer).with_write_timeout(state.config.write_timeout),
    );
    tracing::info!(
        connection_id = %connection.id(),
        user_id = %user.user_id,
        role = %user.role,
        %peer,
        "Connection established"
    );

    state.connect_client_usecase.execute(connection.clone()).await;
    // Registered after shutdown already swept the registry.
    if !state.is_running() {
        connection.request_close();
    }

    let end = read_loop(&mut reader, &connection, handshake.leftover, &state).await;

    match end.close_frame() {
        Some((code, reason)) => connection.close(code, reason).await,
        None => connection.abort().await,
    }
    state
        .disconnect_client_usecase
        .execute(&connection.id())
        .await;

    tracing::info!(
        connection_id = %connection.id(),
        user_id = %connection.user_id(),
        "Connection closed: {:?}",
        end
    );
}

async fn authenticate(
    request: &HandshakeRequest,
    authenticator: &dyn Authenticator,
) -> Result<AuthenticatedUser, AuthError> {
    let token = extract_token(request).ok_or(AuthError::MissingToken)?;
    authenticator.verify(&token).await
}

/// Close an upgraded but unauthenticated stream with 1008.
async fn reject<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_close(CloseCode::POLICY_VIOLATION, AUTH_FAILED_REASON);
    if let Err(e) = writer.write_all(&frame).await {
        tracing::debug!("Failed to write close frame: {}", e);
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(
    reader: &mut R,
    connection: &Connection,
    leftover: Vec<u8>,
    state: &AppState,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
{
    let config = &state.config;
    let mut buffer = FrameBuffer::new(config.max_message_bytes);
    buffer.extend(&leftover);

    if connection.is_close_requested() {
        return SessionEnd::CloseRequested;
    }

    // A zero ping interval disables keepalive and the idle check with it.
    let mut keepalive = (!config.ping_interval.is_zero()).then(|| {
        let mut interval =
            tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut last_seen = Instant::now();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        loop {
            match buffer.next_frame() {
                Ok(Some(frame)) => {
                    if let Some(end) = handle_frame(frame, connection, state).await {
                        return end;
                    }
                }
                Ok(None) => break,
                Err(e) => return SessionEnd::Protocol(e),
            }
        }

        tokio::select! {
            _ = connection.close_requested() => return SessionEnd::CloseRequested,
            _ = next_tick(&mut keepalive) => {
                if last_seen.elapsed() >= config.idle_timeout {
                    return SessionEnd::IdleTimeout;
                }
                if let Err(e) = connection.send_frame(&encode_ping(b"")).await {
                    tracing::debug!(connection_id = %connection.id(), "Ping failed: {}", e);
                }
            }
            read = reader.read(&mut chunk) => match read {
                Ok(0) => return SessionEnd::Eof,
                Ok(n) => {
                    last_seen = Instant::now();
                    buffer.extend(&chunk[..n]);
                }
                Err(e) => return SessionEnd::ReadFailed(e),
            },
        }
    }
}

/// Next keepalive tick; never completes when keepalive is disabled.
async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Act on one decoded frame; `Some` ends the session.
async fn handle_frame(
    frame: Frame,
    connection: &Connection,
    state: &AppState,
) -> Option<SessionEnd> {
    match frame.opcode {
        OpCode::Text if frame.fin => match String::from_utf8(frame.payload) {
            Ok(text) => {
                state.dispatcher.dispatch(connection.user_id(), &text).await;
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = %connection.id(),
                    "Dropping text frame with invalid UTF-8"
                );
            }
        },
        OpCode::Text | OpCode::Continuation => {
            tracing::warn!(connection_id = %connection.id(), "Dropping fragmented message");
        }
        OpCode::Binary => {
            tracing::warn!(connection_id = %connection.id(), "Dropping binary frame");
        }
        OpCode::Ping => {
            if let Err(e) = connection.send_frame(&encode_pong(&frame.payload)).await {
                tracing::debug!(connection_id = %connection.id(), "Pong failed: {}", e);
            }
        }
        OpCode::Pong => {
            tracing::trace!(connection_id = %connection.id(), "Pong received");
        }
        OpCode::Close => {
            let code = parse_close_payload(&frame.payload).map(|(code, _)| code);
            return Some(SessionEnd::PeerClosed(code));
        }
    }
    None
}
