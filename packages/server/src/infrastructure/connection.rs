//! 1 本の WebSocket 接続と、その送信ロック
//!
//! 書き込みはすべて 1 つの非同期 Mutex を通るため、並行する送信者のフレームが
//! ワイヤ上で混ざることはありません。読み込み側は接続ワーカーが持ち、
//! [`Connection::close_requested`] を監視します。
//!
//! 読まない相手への書き込みは送信ロックを握ったまま止まるので、次の 2 つで
//! 上限を設けています。
//! - 書き込みごとのタイムアウト（[`Connection::with_write_timeout`]）
//! - [`Connection::request_close`] による進行中の書き込みの中断

use std::time::Duration;

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ConnectionId, SendError, UserId},
    infrastructure::codec::{CloseCode, encode_close, encode_text},
};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// 認証済み WebSocket 接続の書き込み側
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    /// クローズ済み、または書き込み途中で中断された場合は `None`
    writer: Mutex<Option<BoxedWriter>>,
    /// クローズ要求。キャンセルされると進行中の書き込みも中断される
    close_token: CancellationToken,
    write_timeout: Duration,
}

impl Connection {
    /// 新しい接続を作成（書き込みタイムアウトは [`DEFAULT_WRITE_TIMEOUT`]）
    pub fn new<W>(user_id: UserId, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id: ConnectionId::generate(),
            user_id,
            writer: Mutex::new(Some(Box::new(writer))),
            close_token: CancellationToken::new(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// 1 回の書き込みに許す時間を設定
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// エンコード済みフレームを 1 つ書き込んでフラッシュする
    ///
    /// `write_all` は部分書き込みや割り込みを再試行し、全バイトが受け付けられる
    /// まで書き続けます。
    ///
    /// # Returns
    ///
    /// * `Ok(())` - 書き込み成功
    /// * `Err(SendError::Closed)` - クローズ済み、またはクローズ要求で中断された
    /// * `Err(SendError::Timeout)` - 相手が読まず時間切れ（接続にクローズを要求する）
    /// * `Err(SendError::Io)` - ソケットへの書き込み失敗
    pub async fn send_frame(&self, frame: &[u8]) -> Result<(), SendError> {
        let mut guard = self.writer.lock().await;
        if self.close_token.is_cancelled() {
            return Err(SendError::Closed);
        }
        let writer = guard.as_mut().ok_or(SendError::Closed)?;

        let outcome = tokio::select! {
            biased;
            written = tokio::time::timeout(self.write_timeout, write_and_flush(writer, frame)) => {
                match written {
                    Ok(result) => result.map_err(SendError::from),
                    Err(_) => Err(SendError::Timeout(self.write_timeout)),
                }
            }
            _ = self.close_token.cancelled() => Err(SendError::Closed),
        };

        if matches!(outcome, Err(SendError::Closed | SendError::Timeout(_))) {
            // A frame may be half written; nothing more can follow it.
            *guard = None;
            self.close_token.cancel();
            tracing::debug!(connection_id = %self.id, "Abandoned an unfinished write");
        }
        outcome
    }

    pub async fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.send_frame(&encode_text(text)).await
    }

    /// クローズフレームを書き込み、書き込み側をシャットダウンする
    ///
    /// 以降の送信は [`SendError::Closed`] になります。2 回目以降の呼び出しは
    /// 何もしません。
    pub async fn close(&self, code: CloseCode, reason: &str) {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return;
        };
        let frame = encode_close(code, reason);
        match tokio::time::timeout(self.write_timeout, writer.write_all(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %self.id, "Failed to write close frame: {}", e);
            }
            Err(_) => {
                tracing::debug!(connection_id = %self.id, "Timed out writing close frame");
            }
        }
        let _ = tokio::time::timeout(self.write_timeout, writer.shutdown()).await;
    }

    /// クローズフレームを送らずに書き込み側を閉じる（相手が既にいない場合）
    pub async fn abort(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = tokio::time::timeout(self.write_timeout, writer.shutdown()).await;
        }
    }

    /// ワーカーに読み込みの停止とクローズを要求する
    ///
    /// 送信ロックを握ったまま止まっている書き込みも中断されます。
    pub fn request_close(&self) {
        self.close_token.cancel();
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_token.is_cancelled()
    }

    /// [`Connection::request_close`] が呼ばれると完了する（呼び出し済みなら即座に完了）
    pub async fn close_requested(&self) {
        self.close_token.cancelled().await;
    }
}

async fn write_and_flush(writer: &mut BoxedWriter, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("close_requested", &self.is_close_requested())
            .finish_non_exhaustive()
    }
}
