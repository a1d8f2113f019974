//! UseCase: 認証済み接続の登録
//!
//! ユーザーの最初の接続（0 → 1）のときに `user:online` を全接続へ
//! ブロードキャストします。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - ConnectClientUseCase::execute() による登録と user:online の通知
//!
//! ### なぜこのテストが必要か
//! - プレゼンス通知は 0 → 1 の遷移でだけ送られることを保証する
//!
//! ### どのような状況を想定しているか
//! - 正常系：ユーザーの最初の接続
//! - エッジケース：同じユーザーの 2 台目のデバイス（通知しない）

use std::sync::Arc;

use crate::{
    domain::Envelope,
    infrastructure::{Connection, ConnectionRegistry},
};

use super::Delivery;

/// 接続登録のユースケース
pub struct ConnectClientUseCase {
    registry: Arc<ConnectionRegistry>,
    delivery: Arc<Delivery>,
}

impl ConnectClientUseCase {
    /// 新しい ConnectClientUseCase を作成
    pub fn new(registry: Arc<ConnectionRegistry>, delivery: Arc<Delivery>) -> Self {
        Self { registry, delivery }
    }

    /// 接続登録を実行
    ///
    /// # Arguments
    ///
    /// * `connection` - 認証済みの接続
    ///
    /// # Returns
    ///
    /// * `true` - この接続でユーザーがオンラインになった
    /// * `false` - 既に他の接続でオンラインだった
    pub async fn execute(&self, connection: Arc<Connection>) -> bool {
        let user_id = connection.user_id();
        let came_online = self.registry.register(connection).await;

        if came_online {
            let delivered = self.delivery.broadcast(&Envelope::user_online(user_id)).await;
            tracing::info!(user_id = %user_id, "User online (notified {} connections)", delivered);
        }
        came_online
    }
}
