//! Axum-based broadcast relay.
//!
//! - `GET /ws`: WebSocket; accepts check-ins, replays history, fans out
//!   new check-ins and online counts to every connection
//! - `GET /health`: liveness plus online and history counts
//! - Request body limit (64KB) and request timeout (30s)

mod handlers;
mod server;
mod websocket;

pub use server::{build_app, is_public_bind, run_relay, run_relay_with_listener};

use crate::config::Config;
use crate::core::HistoryBuffer;
use crate::error::ConfigError;
use crate::security::{IdentityRateLimiter, ReplayGuard, Signer};
use crate::transport::protocol::ServerMessage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Maximum request body size (64KB)
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Messages buffered per subscriber before it starts lagging.
pub const BROADCAST_CAPACITY: usize = 256;
/// Longest identity accepted, in characters.
pub const MAX_IDENTITY_CHARS: usize = 128;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<Config>,
    pub history: Arc<Mutex<HistoryBuffer>>,
    pub broadcast_tx: broadcast::Sender<ServerMessage>,
    pub online: Arc<AtomicUsize>,
    pub rate_limiter: Arc<IdentityRateLimiter>,
    pub replay_guard: Arc<ReplayGuard>,
    /// Present when `signing_secret` is configured; unsigned submissions
    /// are then rejected.
    pub verifier: Option<Arc<Signer>>,
}

impl RelayState {
    pub fn new(config: Arc<Config>) -> Result<Self, ConfigError> {
        let verifier = config
            .signing_secret
            .as_deref()
            .map(Signer::new)
            .transpose()?
            .map(Arc::new);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Ok(Self {
            history: Arc::new(Mutex::new(HistoryBuffer::new(config.max_history_size))),
            broadcast_tx,
            online: Arc::new(AtomicUsize::new(0)),
            rate_limiter: Arc::new(IdentityRateLimiter::new(config.relay_cooldown())),
            replay_guard: Arc::new(ReplayGuard::new(config.signature_window())),
            verifier,
            config,
        })
    }

    pub fn online_count(&self) -> usize {
        self.online.load(Ordering::SeqCst)
    }

    pub fn history_len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Send to every connected client. No subscribers is not an error.
    pub fn broadcast(&self, message: ServerMessage) {
        let _ = self.broadcast_tx.send(message);
    }
}

/// Counts one open connection for as long as it lives and announces the
/// new online count on both ends of its life.
pub(crate) struct ConnectionGuard {
    state: RelayState,
}

impl ConnectionGuard {
    /// `None` when the relay is at `max_connections`.
    pub(crate) fn acquire(state: &RelayState) -> Option<Self> {
        let max = state.config.relay.max_connections;
        let previous = state.online.fetch_add(1, Ordering::SeqCst);
        if previous >= max {
            state.online.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("connection rejected: at capacity ({max})");
            return None;
        }
        state.broadcast(ServerMessage::online_users(previous + 1));
        Some(Self {
            state: state.clone(),
        })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let previous = self.state.online.fetch_sub(1, Ordering::SeqCst);
        self.state
            .broadcast(ServerMessage::online_users(previous.saturating_sub(1)));
    }
}
