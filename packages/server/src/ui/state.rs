//! Shared gateway state.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    config::GatewayConfig,
    domain::Authenticator,
    infrastructure::ConnectionRegistry,
    usecase::{ConnectClientUseCase, Delivery, DisconnectClientUseCase, Dispatcher},
};

/// Everything a connection worker needs, shared behind one `Arc`.
pub struct AppState {
    pub config: GatewayConfig,
    /// Authenticator（認証の抽象化）
    pub authenticator: Arc<dyn Authenticator>,
    pub registry: Arc<ConnectionRegistry>,
    pub delivery: Arc<Delivery>,
    pub dispatcher: Arc<Dispatcher>,
    pub connect_client_usecase: ConnectClientUseCase,
    pub disconnect_client_usecase: DisconnectClientUseCase,
    /// Cleared when shutdown starts
    running: AtomicBool,
}

impl AppState {
    pub fn new(config: GatewayConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Arc::new(Delivery::new(registry.clone()));
        let dispatcher = Arc::new(Dispatcher::new());

        Self {
            connect_client_usecase: ConnectClientUseCase::new(registry.clone(), delivery.clone()),
            disconnect_client_usecase: DisconnectClientUseCase::new(
                registry.clone(),
                delivery.clone(),
                dispatcher.clone(),
            ),
            config,
            authenticator,
            registry,
            delivery,
            dispatcher,
            running: AtomicBool::new(true),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop_running(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
