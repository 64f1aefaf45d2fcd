use super::handlers::handle_health;
use super::websocket::ws_handler;
use super::{MAX_BODY_SIZE, REQUEST_TIMEOUT_SECS, RelayState};

use crate::config::Config;
use anyhow::{Context, Result};
use axum::{Router, http::StatusCode, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Returns true when the bind address is not a loopback address.
pub fn is_public_bind(host: &str) -> bool {
    !matches!(
        host,
        "127.0.0.1" | "localhost" | "::1" | "[::1]" | "0:0:0:0:0:0:0:1"
    )
}

/// Run the relay on `host:port`.
pub async fn run_relay(host: &str, port: u16, config: Arc<Config>) -> Result<()> {
    // ── Security: refuse public bind without explicit opt-in ──
    if is_public_bind(host) && !config.relay.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host}: the relay would be exposed to the network.\n\
             Fix: use --host 127.0.0.1 (default), or set\n\
             [relay] allow_public_bind = true in config.toml."
        );
    }

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("parse relay bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind relay socket")?;

    run_relay_with_listener(host, listener, config).await
}

/// Run the relay from a pre-bound listener.
pub async fn run_relay_with_listener(
    host: &str,
    listener: tokio::net::TcpListener,
    config: Arc<Config>,
) -> Result<()> {
    let actual_port = listener
        .local_addr()
        .context("get relay listener local address")?
        .port();
    let display_addr = format!("{host}:{actual_port}");

    let state = RelayState::new(Arc::clone(&config)).context("build relay state")?;
    print_relay_banner(&display_addr, &config);

    let app = build_app(state);
    axum::serve(listener, app).await.context("serve relay")?;

    Ok(())
}

fn print_relay_banner(display_addr: &str, config: &Config) {
    println!("Relay listening on {display_addr}");
    println!("  GET  /ws -> WebSocket");
    println!("  GET  /health");
    if config.relay.require_token {
        println!("  Bearer token required");
    }
    if config.signing_secret.is_some() {
        println!("  Signed check-ins only");
    } else {
        println!("  Signing disabled: unsigned check-ins accepted");
    }
    println!(
        "  Per-identity interval: {}s",
        config.relay_cooldown().as_secs()
    );
}

pub fn build_app(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}
