//! UseCase: 接続の解除
//!
//! 読み込みループの終了とシャットダウンの両方から呼ばれる可能性があるため、
//! 既に解除済みの接続に対しては何もしません（通知も重複しない）。
//!
//! ユーザーの最後の接続（1 → 0）のときに `user:offline` をブロードキャストし、
//! その後に切断ハンドラーを呼び出します。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - DisconnectClientUseCase::execute() による解除、user:offline の通知、切断ハンドラーの呼び出し
//!
//! ### なぜこのテストが必要か
//! - 解除は複数の経路から呼ばれうるため、通知が重複しないことを保証する
//!
//! ### どのような状況を想定しているか
//! - 正常系：ユーザーの最後の接続の解除
//! - エッジケース：他のデバイスが残っている場合、解除済みの接続の再解除

use std::sync::Arc;

use crate::{
    domain::{ConnectionId, Envelope},
    infrastructure::{ConnectionRegistry, Unregistered},
};

use super::{Delivery, Dispatcher};

/// 接続解除のユースケース
pub struct DisconnectClientUseCase {
    registry: Arc<ConnectionRegistry>,
    delivery: Arc<Delivery>,
    dispatcher: Arc<Dispatcher>,
}

impl DisconnectClientUseCase {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        delivery: Arc<Delivery>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            registry,
            delivery,
            dispatcher,
        }
    }

    /// 接続解除を実行
    ///
    /// # Arguments
    ///
    /// * `connection_id` - 解除する接続の ID
    ///
    /// # Returns
    ///
    /// * `Some(Unregistered)` - 解除した接続と、それがユーザーの最後の接続だったか
    /// * `None` - 既に解除済みだった
    pub async fn execute(&self, connection_id: &ConnectionId) -> Option<Unregistered> {
        let unregistered = self.registry.unregister(connection_id).await?;
        let user_id = unregistered.connection.user_id();

        if unregistered.last_for_user {
            let delivered = self
                .delivery
                .broadcast(&Envelope::user_offline(user_id))
                .await;
            tracing::info!(user_id = %user_id, "User offline (notified {} connections)", delivered);
        }

        self.dispatcher.notify_disconnect(user_id).await;
        Some(unregistered)
    }
}
