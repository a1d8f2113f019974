//! UseCase: 受信メッセージのディスパッチ
//!
//! クライアントから届いたテキストフレームを `{type, payload}` として解釈し、
//! `type` に登録されたハンドラーを呼び出します。
//!
//! - 未知の `type` や不正な JSON はログに残して破棄する（接続は閉じない）
//! - ハンドラーは接続ごとのワーカー上で await される
//! - ハンドラーテーブルのロックはハンドラー呼び出し中には保持しない
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - Dispatcher::dispatch() による type ごとのハンドラー呼び出し
//! - 未知の type / 不正な JSON の破棄
//! - 切断ハンドラーの呼び出し
//!
//! ### なぜこのテストが必要か
//! - Dispatcher はアプリケーションがゲートウェイに処理を差し込む唯一の経路
//! - 不正な入力で接続やハンドラーが巻き込まれないことを保証する
//!
//! ### どのような状況を想定しているか
//! - 正常系：登録済みの type のメッセージ
//! - 異常系：JSON でない文字列、`type` の無いオブジェクト、未登録の type
//! - エッジケース：同じ type への再登録、切断ハンドラー未登録での切断通知

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::domain::{DisconnectHandler, Envelope, MessageHandler, UserId};

/// 受信メッセージ 1 件の処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// ハンドラーが最後まで実行された
    Handled(String),
    /// この type のハンドラーが登録されていない
    UnknownType(String),
    /// `{type, payload}` 形式のオブジェクトではなかった
    Malformed,
}

/// メッセージハンドラーのテーブルと切断ハンドラー
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    disconnect_handler: RwLock<Option<Arc<dyn DisconnectHandler>>>,
}

impl Dispatcher {
    /// 新しい Dispatcher を作成
    pub fn new() -> Self {
        Self::default()
    }

    /// `message_type` のハンドラーを登録（登録済みなら置き換える）
    ///
    /// # Arguments
    ///
    /// * `message_type` - エンベロープの `type` と完全一致で照合される
    /// * `handler` - 接続ワーカー上で await されるハンドラー
    pub async fn register_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        let message_type = message_type.into();
        let mut handlers = self.handlers.write().await;
        if handlers.insert(message_type.clone(), handler).is_some() {
            tracing::warn!("Handler for '{}' replaced", message_type);
        } else {
            tracing::debug!("Handler for '{}' registered", message_type);
        }
    }

    pub async fn register_disconnect_handler(&self, handler: Arc<dyn DisconnectHandler>) {
        *self.disconnect_handler.write().await = Some(handler);
    }

    /// `text` をデコードし、その type に登録されたハンドラーを実行
    ///
    /// # Arguments
    ///
    /// * `user_id` - 送信元の接続のユーザー
    /// * `text` - テキストフレームのペイロード
    ///
    /// # Returns
    ///
    /// * `DispatchOutcome` - ハンドラーを実行したか、破棄した理由
    pub async fn dispatch(&self, user_id: UserId, text: &str) -> DispatchOutcome {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(user_id = %user_id, "Dropping malformed message: {}", e);
                return DispatchOutcome::Malformed;
            }
        };

        let handler = self.handlers.read().await.get(&envelope.r#type).cloned();
        let Some(handler) = handler else {
            tracing::warn!(
                user_id = %user_id,
                "No handler for message type '{}', dropping",
                envelope.r#type
            );
            return DispatchOutcome::UnknownType(envelope.r#type);
        };

        let message_type = envelope.r#type.clone();
        tracing::debug!(user_id = %user_id, "Dispatching '{}'", message_type);
        handler.handle(user_id, envelope).await;
        DispatchOutcome::Handled(message_type)
    }

    /// 切断ハンドラーが登録されていれば実行
    pub async fn notify_disconnect(&self, user_id: UserId) {
        let handler = self.disconnect_handler.read().await.clone();
        if let Some(handler) = handler {
            handler.on_disconnect(user_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::handler::{MockDisconnectHandler, MockMessageHandler};
    use mockall::predicate::eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_invokes_registered_handler() {
        // テスト項目: 登録された type のハンドラーが user_id と envelope を受け取る
        // given (前提条件):
        let dispatcher = Dispatcher::new();
        let mut handler = MockMessageHandler::new();
        handler
            .expect_handle()
            .with(
                eq(UserId::new(42)),
                eq(Envelope::new("chat:send", json!({"content": "Hello"}))),
            )
            .times(1)
            .returning(|_, _| ());
        dispatcher
            .register_handler("chat:send", Arc::new(handler))
            .await;

        // when (操作):
        let outcome = dispatcher
            .dispatch(
                UserId::new(42),
                r#"{"type":"chat:send","payload":{"content":"Hello"}}"#,
            )
            .await;

        // then (期待する結果):
        assert_eq!(outcome, DispatchOutcome::Handled("chat:send".to_string()));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_type_is_dropped() {
        // テスト項目: 未登録の type はハンドラーを呼ばずに破棄される
        // given (前提条件):
        let dispatcher = Dispatcher::new();
        let mut handler = MockMessageHandler::new();
        handler.expect_handle().never();
        dispatcher
            .register_handler("chat:send", Arc::new(handler))
            .await;

        // when (操作):
        let outcome = dispatcher
            .dispatch(UserId::new(1), r#"{"type":"post:like","payload":{}}"#)
            .await;

        // then (期待する結果):
        assert_eq!(outcome, DispatchOutcome::UnknownType("post:like".to_string()));
    }

    #[tokio::test]
    async fn test_dispatch_malformed_message_is_dropped() {
        // テスト項目: JSON でない、または type を持たないメッセージは破棄される
        // given (前提条件):
        let dispatcher = Dispatcher::new();

        // when (操作):
        let not_json = dispatcher.dispatch(UserId::new(1), "hello").await;
        let no_type = dispatcher.dispatch(UserId::new(1), r#"{"payload":1}"#).await;

        // then (期待する結果):
        assert_eq!(not_json, DispatchOutcome::Malformed);
        assert_eq!(no_type, DispatchOutcome::Malformed);
    }

    #[tokio::test]
    async fn test_register_handler_replaces_previous() {
        // テスト項目: 同じ type に再登録すると新しいハンドラーに置き換わる
        // given (前提条件):
        let dispatcher = Dispatcher::new();
        let mut old = MockMessageHandler::new();
        old.expect_handle().never();
        let mut new = MockMessageHandler::new();
        new.expect_handle().times(1).returning(|_, _| ());
        dispatcher.register_handler("chat:send", Arc::new(old)).await;
        dispatcher.register_handler("chat:send", Arc::new(new)).await;

        // when (操作):
        let outcome = dispatcher
            .dispatch(UserId::new(1), r#"{"type":"chat:send"}"#)
            .await;

        // then (期待する結果): 古いハンドラーは呼ばれない（drop 時に検証）
        assert_eq!(outcome, DispatchOutcome::Handled("chat:send".to_string()));
    }

    #[tokio::test]
    async fn test_notify_disconnect_invokes_handler() {
        // テスト項目: 切断ハンドラーに user_id が渡される
        // given (前提条件):
        let dispatcher = Dispatcher::new();
        let mut handler = MockDisconnectHandler::new();
        handler
            .expect_on_disconnect()
            .with(eq(UserId::new(9)))
            .times(1)
            .returning(|_| ());
        dispatcher
            .register_disconnect_handler(Arc::new(handler))
            .await;

        // when (操作):
        dispatcher.notify_disconnect(UserId::new(9)).await;

        // then (期待する結果): times(1) が drop 時に検証される
    }

    #[tokio::test]
    async fn test_notify_disconnect_without_handler_is_noop() {
        // テスト項目: 切断ハンドラー未登録でも問題なく処理される
        // given (前提条件):
        let dispatcher = Dispatcher::new();

        // when (操作):
        dispatcher.notify_disconnect(UserId::new(9)).await;

        // then (期待する結果): パニックしない
    }
}
