use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay port (default: 8787)
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// Relay host (default: 127.0.0.1)
    #[serde(default = "default_relay_host")]
    pub host: String,
    /// Allow binding to non-localhost (default: false)
    #[serde(default)]
    pub allow_public_bind: bool,
    /// Require a bearer token on the WebSocket handshake (default: false)
    #[serde(default)]
    pub require_token: bool,
    /// Accepted bearer tokens
    #[serde(default)]
    pub tokens: Vec<String>,
    /// Maximum age (either direction) of a signing timestamp
    #[serde(default = "default_signature_window_secs")]
    pub signature_window_secs: u64,
    /// Per-identity minimum interval; falls back to the client cooldown
    #[serde(default)]
    pub cooldown_secs: Option<u64>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_relay_port() -> u16 {
    8787
}

fn default_relay_host() -> String {
    "127.0.0.1".into()
}

fn default_signature_window_secs() -> u64 {
    300
}

fn default_max_connections() -> usize {
    500
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            host: default_relay_host(),
            allow_public_bind: false,
            require_token: false,
            tokens: Vec::new(),
            signature_window_secs: default_signature_window_secs(),
            cooldown_secs: None,
            max_connections: default_max_connections(),
        }
    }
}
