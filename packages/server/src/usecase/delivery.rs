//! UseCase: ユニキャスト / マルチキャスト / ブロードキャスト配信
//!
//! エンベロープは 1 度だけシリアライズしてフレーム化し、同じバイト列を
//! 対象の各接続へ書き込みます。接続ごとの送信は並行に行い、順序は各接続の
//! 送信ロックが保ちます。読まない相手は書き込みタイムアウトで切り離されます。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - send_to_user: ユーザーの全デバイスへのファンアウト
//! - send_to_users: 複数ユーザーへの送信と部分失敗
//! - broadcast: 全接続への送信と、並行する接続/切断との共存
//!
//! ### なぜこのテストが必要か
//! - 1 つの接続の失敗や停滞が他の接続への配信を妨げないことを保証する
//!
//! ### どのような状況を想定しているか
//! - 正常系：オンラインのユーザーへの配信
//! - 異常系：オフラインのユーザー、切断済みの相手、読み込みを止めた相手
//! - エッジケース：ブロードキャスト中の接続・切断、シャットダウン中のブロードキャスト

use std::{collections::HashSet, sync::Arc};

use futures_util::future::join_all;

use crate::{
    domain::{Envelope, SendError, UserId},
    infrastructure::{Connection, ConnectionRegistry, codec::encode_text},
};

/// 配信のユースケース
pub struct Delivery {
    registry: Arc<ConnectionRegistry>,
}

impl Delivery {
    /// 新しい Delivery を作成
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// `user_id` の全接続へ送信
    ///
    /// # Arguments
    ///
    /// * `user_id` - 宛先のユーザー
    /// * `envelope` - 送信するエンベロープ
    ///
    /// # Returns
    ///
    /// * `true` - 少なくとも 1 つの接続が受け付けた
    /// * `false` - オフライン、またはすべての書き込みが失敗した
    pub async fn send_to_user(&self, user_id: UserId, envelope: &Envelope) -> bool {
        let Some(frame) = encode_envelope(envelope) else {
            return false;
        };
        self.send_frame_to_user(user_id, &frame).await
    }

    /// `user_ids` の各ユーザーへ送信（1 人の失敗で他への送信は止まらない）
    ///
    /// # Returns
    ///
    /// * `HashSet<UserId>` - 少なくとも 1 つの接続に届いたユーザー
    pub async fn send_to_users<I>(&self, user_ids: I, envelope: &Envelope) -> HashSet<UserId>
    where
        I: IntoIterator<Item = UserId>,
    {
        let Some(frame) = encode_envelope(envelope) else {
            return HashSet::new();
        };

        let targets: HashSet<UserId> = user_ids.into_iter().collect();
        let mut reached = HashSet::with_capacity(targets.len());
        for user_id in targets {
            if self.send_frame_to_user(user_id, &frame).await {
                reached.insert(user_id);
            }
        }
        reached
    }

    /// 登録済みの全接続へ送信
    ///
    /// 途中で閉じた接続は読み飛ばします。
    ///
    /// # Returns
    ///
    /// * `usize` - フレームを受け付けた接続数
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        let Some(frame) = encode_envelope(envelope) else {
            return 0;
        };
        let connections = self.registry.connections().await;
        let delivered = send_to_all(&connections, &frame).await;
        tracing::debug!(
            "Broadcasted '{}' to {}/{} connections",
            envelope.r#type,
            delivered,
            connections.len()
        );
        delivered
    }

    async fn send_frame_to_user(&self, user_id: UserId, frame: &[u8]) -> bool {
        let connections = self.registry.connections_of(user_id).await;
        if connections.is_empty() {
            tracing::debug!(user_id = %user_id, "User has no open connections");
            return false;
        }
        send_to_all(&connections, frame).await > 0
    }
}

fn encode_envelope(envelope: &Envelope) -> Option<Vec<u8>> {
    match envelope.to_json() {
        Ok(json) => Some(encode_text(&json)),
        Err(e) => {
            tracing::error!("Failed to serialize '{}' envelope: {}", envelope.r#type, e);
            None
        }
    }
}

async fn send_to_all(connections: &[Arc<Connection>], frame: &[u8]) -> usize {
    let results = join_all(connections.iter().map(|connection| async move {
        match connection.send_frame(frame).await {
            Ok(()) => true,
            Err(SendError::Closed) => {
                tracing::debug!(connection_id = %connection.id(), "Skipping closed connection");
                false
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection.id(),
                    user_id = %connection.user_id(),
                    "Failed to push frame: {}",
                    e
                );
                false
            }
        }
    }))
    .await;
    results.into_iter().filter(|sent| *sent).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{infrastructure::codec::CloseCode, test_support::duplex_connection};
    use serde_json::json;
    use std::time::Duration;

    fn chat(content: &str) -> Envelope {
        Envelope::new("chat:message", json!({ "content": content }))
    }

    #[tokio::test]
    async fn test_send_to_user_reaches_every_device() {
        // テスト項目: 2 つの接続を持つユーザーに両方の接続で届く
        // given (前提条件):
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Delivery::new(registry.clone());
        let (phone, mut phone_peer) = duplex_connection(1);
        let (laptop, mut laptop_peer) = duplex_connection(1);
        let (other, mut other_peer) = duplex_connection(2);
        for conn in [phone, laptop, other] {
            registry.register(conn).await;
        }

        // when (操作):
        let sent = delivery.send_to_user(UserId::new(1), &chat("hi")).await;

        // then (期待する結果):
        assert!(sent);
        assert_eq!(phone_peer.next_envelope().await, chat("hi"));
        assert_eq!(laptop_peer.next_envelope().await, chat("hi"));
        assert!(other_peer.is_silent_for(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_send_to_offline_user_returns_false() {
        // テスト項目: 接続の無いユーザーへの送信は false を返す
        // given (前提条件):
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Delivery::new(registry);

        // when (操作):
        let sent = delivery.send_to_user(UserId::new(404), &chat("hi")).await;

        // then (期待する結果):
        assert!(!sent);
    }

    #[tokio::test]
    async fn test_send_to_user_false_when_all_writes_fail() {
        // テスト項目: 全ての書き込みが失敗した場合は false を返す
        // given (前提条件):
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Delivery::new(registry.clone());
        let (conn, peer) = duplex_connection(1);
        registry.register(conn.clone()).await;
        drop(peer);

        // when (操作):
        let sent = delivery.send_to_user(UserId::new(1), &chat("hi")).await;

        // then (期待する結果): 送信失敗でも接続は登録されたまま
        assert!(!sent);
        assert!(registry.is_online(UserId::new(1)).await);
    }

    #[tokio::test]
    async fn test_send_to_users_partial_failure() {
        // テスト項目: 一部のユーザーが不在でも他のユーザーには届く
        // given (前提条件):
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Delivery::new(registry.clone());
        let (alice, mut alice_peer) = duplex_connection(1);
        let (bob, mut bob_peer) = duplex_connection(2);
        registry.register(alice).await;
        registry.register(bob).await;

        // when (操作):
        let reached = delivery
            .send_to_users(
                [UserId::new(1), UserId::new(3), UserId::new(2)],
                &chat("group"),
            )
            .await;

        // then (期待する結果):
        assert_eq!(reached, HashSet::from([UserId::new(1), UserId::new(2)]));
        assert_eq!(alice_peer.next_envelope().await, chat("group"));
        assert_eq!(bob_peer.next_envelope().await, chat("group"));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_and_skips_dead_connections() {
        // テスト項目: broadcast は全接続に送信し、切断済みの接続はスキップする
        // given (前提条件):
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Delivery::new(registry.clone());
        let (alive, mut alive_peer) = duplex_connection(1);
        let (dead, dead_peer) = duplex_connection(2);
        registry.register(alive).await;
        registry.register(dead).await;
        drop(dead_peer);

        // when (操作):
        let delivered = delivery.broadcast(&chat("all")).await;

        // then (期待する結果):
        assert_eq!(delivered, 1);
        assert_eq!(alive_peer.next_envelope().await, chat("all"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_broadcast_concurrent_with_register_and_unregister() {
        // テスト項目: 接続・切断と並行して broadcast してもレジストリが壊れない
        // given (前提条件):
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Arc::new(Delivery::new(registry.clone()));
        let (stable, _stable_peer) = duplex_connection(0);
        registry.register(stable.clone()).await;

        // when (操作):
        let mut tasks = Vec::new();
        for worker in 0..4i64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..200i64 {
                    let conn = Arc::new(Connection::new(
                        UserId::new(1 + (worker * 200 + round) % 7),
                        tokio::io::sink(),
                    ));
                    registry.register(conn.clone()).await;
                    tokio::task::yield_now().await;
                    assert!(registry.unregister(&conn.id()).await.is_some());
                    assert!(registry.unregister(&conn.id()).await.is_none());
                }
            }));
        }
        for _ in 0..4 {
            let delivery = delivery.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let delivered = delivery.broadcast(&Envelope::new("tick", json!(null))).await;
                    assert!(delivered >= 1);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // then (期待する結果):
        registry.check_invariants().await.unwrap();
        assert_eq!(registry.online_users().await, vec![UserId::new(0)]);
        assert!(registry.connections().await.iter().any(|c| c.id() == stable.id()));
    }

    #[tokio::test]
    async fn test_close_all_unblocks_broadcast_stuck_on_peer_that_never_reads() {
        // テスト項目: 読まない相手で止まったブロードキャストが close_all で戻り、
        //             その接続の close も完了する
        // given (前提条件):
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Arc::new(Delivery::new(registry.clone()));
        let (_stalled_peer, server) = tokio::io::duplex(64);
        let stalled = Arc::new(Connection::new(UserId::new(1), server));
        registry.register(stalled.clone()).await;
        let broadcasting = {
            let delivery = delivery.clone();
            tokio::spawn(async move {
                delivery
                    .broadcast(&Envelope::new("bulk", json!("x".repeat(4096))))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!broadcasting.is_finished());

        // when (操作):
        registry.close_all().await;

        // then (期待する結果):
        let delivered = tokio::time::timeout(Duration::from_secs(1), broadcasting)
            .await
            .expect("broadcast stayed blocked")
            .unwrap();
        assert_eq!(delivered, 0);
        tokio::time::timeout(
            Duration::from_secs(1),
            stalled.close(CloseCode::GOING_AWAY, "server shutting down"),
        )
        .await
        .expect("close stayed blocked");
    }

    #[tokio::test]
    async fn test_peer_that_never_reads_does_not_hold_back_others() {
        // テスト項目: 読まない相手は書き込みタイムアウトで切り離され、他の接続には届く
        // given (前提条件):
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Delivery::new(registry.clone());
        let (_stalled_peer, server) = tokio::io::duplex(64);
        let stalled = Arc::new(
            Connection::new(UserId::new(1), server).with_write_timeout(Duration::from_millis(100)),
        );
        let (alive, mut alive_peer) = duplex_connection(2);
        registry.register(stalled.clone()).await;
        registry.register(alive).await;
        let bulk = Envelope::new("bulk", json!("x".repeat(4096)));

        // when (操作):
        let delivered = tokio::time::timeout(Duration::from_secs(1), delivery.broadcast(&bulk))
            .await
            .expect("broadcast stayed blocked");

        // then (期待する結果):
        assert_eq!(delivered, 1);
        assert_eq!(alive_peer.next_envelope().await, bulk);
        assert!(stalled.is_close_requested());
    }
}
