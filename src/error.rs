use std::time::Duration;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `checkin-relay`.
///
/// Each concern defines its own variant. Callers match on these to decide
/// recovery strategy; startup and CLI code continue to use `anyhow::Result`
/// for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum RelayError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Transport ───────────────────────────────────────────────────────
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    // ── Authentication ──────────────────────────────────────────────────
    #[error("authentication failed: {0}")]
    Authentication(String),

    // ── Local validation ────────────────────────────────────────────────
    #[error("invalid check-in: {0}")]
    Validation(String),

    // ── Cooldown / relay throttling ─────────────────────────────────────
    #[error("rate limited (retry in {}s)", remaining.as_secs())]
    RateLimit { remaining: Duration },

    // ── Inbound parsing ─────────────────────────────────────────────────
    #[error("parse: {0}")]
    Parse(#[from] ParseError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Transport failures are retried through reconnect backoff; everything
    /// else needs new input or new credentials.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(err) => !err.is_auth_rejection(),
            Self::RateLimit { .. } => true,
            _ => false,
        }
    }
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid relay url {url}: {reason}")]
    RelayUrl { url: String, reason: String },
}

// ─── Transport errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    #[error("connect to {url} timed out after {timeout_ms}ms")]
    ConnectTimeout { url: String, timeout_ms: u64 },

    #[error("relay at {url} refused the handshake (HTTP {status})")]
    Unauthorized { url: String, status: u16 },

    #[error("send failed: {0}")]
    Send(String),

    #[error("not connected")]
    NotConnected,

    #[error("connection driver stopped")]
    DriverStopped,
}

impl TransportError {
    /// The relay turned our credentials away; retrying with the same ones
    /// cannot succeed.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

// ─── Parse errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, RelayError>;
