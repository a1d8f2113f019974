//! Listener and public gateway handle.

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

use tokio::{net::TcpListener, sync::Notify};

use crate::{
    config::GatewayConfig,
    domain::{Authenticator, DisconnectHandler, Envelope, MessageHandler, UserId},
    usecase::Delivery,
};

use super::{
    error::GatewayError, session::handle_connection, signal::shutdown_signal, state::AppState,
};

/// Pause after a failed `accept` so a persistent error (e.g., too many open
/// files) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Real-time messaging gateway
///
/// Owns the connection registry, the dispatcher and the delivery service.
/// Handlers are registered before or while serving; application code pushes
/// events through [`Gateway::send_to_user`], [`Gateway::send_to_users`] and
/// [`Gateway::broadcast`].
///
/// # Example
///
/// ```ignore
/// let gateway = Arc::new(Gateway::new(config, Arc::new(JwtAuthenticator::new(secret))));
/// gateway.register_handler("chat:send", handler_fn(|user_id, envelope| async move {
///     // ...
/// })).await;
/// let listener = gateway.bind().await?;
/// gateway.serve(listener, shutdown_signal()).await?;
/// ```
pub struct Gateway {
    state: Arc<AppState>,
    shutdown: Notify,
}

impl Gateway {
    pub fn new(config: GatewayConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            state: Arc::new(AppState::new(config, authenticator)),
            shutdown: Notify::new(),
        }
    }

    /// Register `handler` for messages whose `type` equals `message_type`.
    ///
    /// Registering the same type twice replaces the earlier handler.
    pub async fn register_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.state
            .dispatcher
            .register_handler(message_type, handler)
            .await;
    }

    /// Set the handler run once for every closed connection.
    pub async fn register_disconnect_handler(&self, handler: Arc<dyn DisconnectHandler>) {
        self.state
            .dispatcher
            .register_disconnect_handler(handler)
            .await;
    }

    /// Delivery service, for handlers that need to push events.
    pub fn delivery(&self) -> Arc<Delivery> {
        self.state.delivery.clone()
    }

    pub async fn send_to_user(&self, user_id: UserId, envelope: &Envelope) -> bool {
        self.state.delivery.send_to_user(user_id, envelope).await
    }

    pub async fn send_to_users<I>(&self, user_ids: I, envelope: &Envelope) -> HashSet<UserId>
    where
        I: IntoIterator<Item = UserId>,
    {
        self.state.delivery.send_to_users(user_ids, envelope).await
    }

    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        self.state.delivery.broadcast(envelope).await
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.state.registry.is_online(user_id).await
    }

    pub async fn online_users(&self) -> Vec<UserId> {
        self.state.registry.online_users().await
    }

    pub async fn connection_count(&self) -> usize {
        self.state.registry.len().await
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Bind the listening socket at the configured address.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Bind`] when the address is unavailable.
    pub async fn bind(&self) -> Result<TcpListener, GatewayError> {
        let addr = self.state.config.bind_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|source| GatewayError::Bind { addr, source })
    }

    /// Accept connections on `listener` until `shutdown_signal` resolves or
    /// [`Gateway::shutdown`] is called.
    ///
    /// On the way out every registered connection is asked to close and the
    /// listener is dropped, so no new connection is accepted.
    pub async fn serve<F>(
        &self,
        listener: TcpListener,
        shutdown_signal: F,
    ) -> Result<(), GatewayError>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        tracing::info!("Gateway listening on {}", local_addr);
        tracing::info!("Connect to: ws://{}/?token=<jwt>", local_addr);

        tokio::pin!(shutdown_signal);

        while self.state.is_running() {
            tokio::select! {
                _ = &mut shutdown_signal => break,
                _ = self.shutdown.notified() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(%peer, "Failed to set TCP_NODELAY: {}", e);
                        }
                        tracing::debug!(%peer, "Accepted connection");
                        tokio::spawn(handle_connection(stream, peer, self.state.clone()));
                    }
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        self.state.stop_running();
        let closing = self.state.registry.close_all().await;
        drop(listener);
        tracing::info!("Gateway stopped; asked {} connections to close", closing);

        Ok(())
    }

    /// Bind and serve until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = self.bind().await?;
        tracing::info!("Press Ctrl+C to shutdown gracefully");
        self.serve(listener, shutdown_signal()).await
    }

    /// Stop a running [`Gateway::serve`].
    ///
    /// Safe to call from a handler or another task; calling it again has no
    /// further effect.
    pub fn shutdown(&self) {
        self.state.stop_running();
        self.shutdown.notify_one();
    }
}
