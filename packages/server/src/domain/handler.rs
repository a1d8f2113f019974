//! Extension points the surrounding application uses to plug business logic
//! into the gateway.
//!
//! Handlers run on the worker of the connection that sent the message, so a
//! slow handler only delays further reads from that one connection.

use std::{future::Future, sync::Arc};

use async_trait::async_trait;

use super::{Envelope, UserId};

/// Handles every inbound envelope of one registered `type`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, user_id: UserId, message: Envelope);
}

/// Notified after a connection of `user_id` has been closed and deregistered.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DisconnectHandler: Send + Sync {
    async fn on_disconnect(&self, user_id: UserId);
}

struct HandlerFn<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(UserId, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, user_id: UserId, message: Envelope) {
        (self.0)(user_id, message).await
    }
}

struct DisconnectFn<F>(F);

#[async_trait]
impl<F, Fut> DisconnectHandler for DisconnectFn<F>
where
    F: Fn(UserId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_disconnect(&self, user_id: UserId) {
        (self.0)(user_id).await
    }
}

/// Wrap an async closure as a [`MessageHandler`].
///
/// ```ignore
/// gateway
///     .register_handler("chat:send", handler_fn(|user_id, message| async move {
///         tracing::info!("{} sent {:?}", user_id, message.payload);
///     }))
///     .await;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(UserId, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Wrap an async closure as a [`DisconnectHandler`].
pub fn disconnect_handler_fn<F, Fut>(f: F) -> Arc<dyn DisconnectHandler>
where
    F: Fn(UserId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(DisconnectFn(f))
}
