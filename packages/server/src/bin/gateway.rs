//! Pulse real-time gateway.
//!
//! Authenticates WebSocket clients with an HS256 JWT and pushes presence and
//! chat events to every device a user has connected.
//!
//! Run with:
//! ```not_rust
//! PULSE_JWT_SECRET=change-me cargo run --bin pulse-gateway
//! cargo run --bin pulse-gateway -- --host 0.0.0.0 --port 3000 --jwt-secret change-me
//! ```

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use clap::Parser;
use pulse_server::{
    Gateway, GatewayConfig,
    domain::{Envelope, handler_fn},
    infrastructure::{auth::JwtAuthenticator, handshake::HandshakeLimits},
    ui::shutdown_signal,
};
use pulse_shared::logger::setup_logger;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "pulse-gateway")]
#[command(about = "Real-time messaging gateway over WebSocket", long_about = None)]
struct Args {
    /// Host address to bind the gateway to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the gateway to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Shared secret used to verify HS256 tokens
    #[arg(long, env = "PULSE_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Clock skew tolerated when checking token expiry
    #[arg(long, default_value = "0")]
    jwt_leeway_secs: u64,

    /// Seconds between server pings
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
    ping_interval_secs: u64,

    /// Close connections silent for this many seconds
    #[arg(long, default_value = "90", value_parser = clap::value_parser!(u64).range(1..))]
    idle_timeout_secs: u64,

    /// Close connections whose peer does not accept a frame within this many seconds
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    write_timeout_secs: u64,

    /// Largest accepted frame payload in bytes
    #[arg(long, default_value = "1048576")]
    max_message_bytes: usize,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            host: self.host.clone(),
            port: self.port,
            handshake: HandshakeLimits::default(),
            max_message_bytes: self.max_message_bytes,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    let authenticator =
        JwtAuthenticator::new(args.jwt_secret.as_bytes()).with_leeway(args.jwt_leeway_secs);
    let gateway = Arc::new(Gateway::new(args.gateway_config(), Arc::new(authenticator)));

    register_demo_handlers(&gateway).await;

    let listener = match gateway.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Gateway error: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    if let Err(e) = gateway.serve(listener, shutdown_signal()).await {
        tracing::error!("Gateway error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Gateway shutdown complete");
}

/// `chat:send` re-broadcasts as `chat:message`; `presence:list` answers with
/// the online users.
async fn register_demo_handlers(gateway: &Arc<Gateway>) {
    let delivery = gateway.delivery();
    gateway
        .register_handler(
            "chat:send",
            handler_fn(move |user_id, envelope| {
                let delivery = delivery.clone();
                async move {
                    let message = Envelope::new(
                        "chat:message",
                        json!({ "user_id": user_id, "content": envelope.payload }),
                    );
                    delivery.broadcast(&message).await;
                }
            }),
        )
        .await;

    // The gateway owns its handlers, so they only hold a weak reference back.
    let weak: Weak<Gateway> = Arc::downgrade(gateway);
    gateway
        .register_handler(
            "presence:list",
            handler_fn(move |user_id, _| {
                let weak = weak.clone();
                async move {
                    let Some(gateway) = weak.upgrade() else {
                        return;
                    };
                    let online = gateway.online_users().await;
                    let snapshot = Envelope::new("presence:snapshot", json!({ "users": online }));
                    gateway.send_to_user(user_id, &snapshot).await;
                }
            }),
        )
        .await;
}
