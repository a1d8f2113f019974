//! UseCase layer: what the gateway does with connections and messages.

pub mod connect_client;
pub mod delivery;
pub mod disconnect_client;
pub mod dispatch;

pub use connect_client::ConnectClientUseCase;
pub use delivery::Delivery;
pub use disconnect_client::DisconnectClientUseCase;
pub use dispatch::{DispatchOutcome, Dispatcher};
