use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Handle check-ins are published under
    #[serde(default)]
    pub identity: String,
    /// Profile image URI; initials are shown when absent
    #[serde(default)]
    pub avatar_ref: Option<String>,
    /// Activity tags sent with every check-in (at most 3 are used)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Token presented to the relay during the handshake and on submissions
    #[serde(default)]
    pub identity_token: Option<String>,
    /// Refuse to submit when no identity token is available (default: false)
    #[serde(default)]
    pub require_identity_token: bool,
    #[serde(default = "default_token_timeout_ms")]
    pub token_timeout_ms: u64,
    /// Reconnect with backoff after the relay connection drops (default: true)
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Wait after tearing down before an explicit reconnect
    #[serde(default = "default_reconnect_settle_ms")]
    pub reconnect_settle_ms: u64,
    /// Quiet period that ends initial history
    #[serde(default = "default_history_idle_ms")]
    pub history_idle_ms: u64,
    /// Hard bound on initial history, even when nothing arrives
    #[serde(default = "default_history_ceiling_ms")]
    pub history_ceiling_ms: u64,
    /// Show own check-ins before the relay echoes them (default: true)
    #[serde(default = "default_true")]
    pub local_echo: bool,
    /// Attach a random decorative snippet to check-ins (default: true)
    #[serde(default = "default_true")]
    pub decorate: bool,
}

fn default_true() -> bool {
    true
}

fn default_token_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_reconnect_settle_ms() -> u64 {
    1_000
}

fn default_history_idle_ms() -> u64 {
    1_000
}

fn default_history_ceiling_ms() -> u64 {
    3_000
}

impl ClientConfig {
    pub fn token_timeout(&self) -> Duration {
        Duration::from_millis(self.token_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn reconnect_settle(&self) -> Duration {
        Duration::from_millis(self.reconnect_settle_ms)
    }

    pub fn history_idle(&self) -> Duration {
        Duration::from_millis(self.history_idle_ms)
    }

    pub fn history_ceiling(&self) -> Duration {
        Duration::from_millis(self.history_ceiling_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            avatar_ref: None,
            tags: Vec::new(),
            identity_token: None,
            require_identity_token: false,
            token_timeout_ms: default_token_timeout_ms(),
            auto_reconnect: true,
            connect_timeout_ms: default_connect_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            reconnect_settle_ms: default_reconnect_settle_ms(),
            history_idle_ms: default_history_idle_ms(),
            history_ceiling_ms: default_history_ceiling_ms(),
            local_echo: true,
            decorate: true,
        }
    }
}
