use super::super::{ClientConfig, RelayConfig};
use crate::core::{
    DEFAULT_MAX_HISTORY_SIZE, DEFAULT_MAX_MESSAGE_CHARS, MAX_COOLDOWN_MINUTES, period_from_minutes,
};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// WebSocket endpoint of the relay
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Minimum minutes between check-ins from one identity
    #[serde(default = "default_cooldown_period_minutes")]
    pub cooldown_period_minutes: f64,
    /// Shared HMAC secret; check-ins are sent unsigned when absent
    #[serde(default)]
    pub signing_secret: Option<String>,
    /// Message bound in UTF-16 code units
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Identities retained in history (client and relay)
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub relay: RelayConfig,
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:8787/ws".into()
}

fn default_cooldown_period_minutes() -> f64 {
    5.0
}

fn default_max_message_chars() -> usize {
    DEFAULT_MAX_MESSAGE_CHARS
}

fn default_max_history_size() -> usize {
    DEFAULT_MAX_HISTORY_SIZE
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            relay_url: default_relay_url(),
            cooldown_period_minutes: default_cooldown_period_minutes(),
            signing_secret: None,
            max_message_chars: default_max_message_chars(),
            max_history_size: default_max_history_size(),
            log_level: default_log_level(),
            client: ClientConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

impl Config {
    pub fn cooldown_period(&self) -> Duration {
        period_from_minutes(self.cooldown_period_minutes)
    }

    /// Interval the relay enforces per identity.
    pub fn relay_cooldown(&self) -> Duration {
        self.relay
            .cooldown_secs
            .map_or_else(|| self.cooldown_period(), Duration::from_secs)
    }

    pub fn signature_window(&self) -> Duration {
        Duration::from_secs(self.relay.signature_window_secs)
    }

    pub fn parsed_relay_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.relay_url).map_err(|e| ConfigError::RelayUrl {
            url: self.relay_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::RelayUrl {
                url: self.relay_url.clone(),
                reason: format!("unsupported scheme '{}', expected ws or wss", url.scheme()),
            });
        }
        Ok(url)
    }

    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parsed_relay_url()?;

        if !self.cooldown_period_minutes.is_finite() || self.cooldown_period_minutes < 0.0 {
            return Err(ConfigError::Validation(
                "cooldown_period_minutes must be a non-negative number".into(),
            ));
        }
        if self.cooldown_period_minutes > MAX_COOLDOWN_MINUTES {
            return Err(ConfigError::Validation(format!(
                "cooldown_period_minutes must be at most {MAX_COOLDOWN_MINUTES}"
            )));
        }
        if self.max_message_chars == 0 {
            return Err(ConfigError::Validation(
                "max_message_chars must be greater than 0".into(),
            ));
        }
        if self.max_history_size == 0 {
            return Err(ConfigError::Validation(
                "max_history_size must be greater than 0".into(),
            ));
        }
        if self.client.backoff_base_ms == 0 {
            return Err(ConfigError::Validation(
                "client.backoff_base_ms must be greater than 0".into(),
            ));
        }
        if self.client.backoff_max_ms < self.client.backoff_base_ms {
            return Err(ConfigError::Validation(
                "client.backoff_max_ms must be at least client.backoff_base_ms".into(),
            ));
        }
        if self.signing_secret.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Validation(
                "signing_secret must not be empty when set".into(),
            ));
        }
        if self.relay.require_token && self.relay.tokens.is_empty() {
            return Err(ConfigError::Validation(
                "relay.require_token is set but relay.tokens is empty".into(),
            ));
        }
        Ok(())
    }

    /// Copy with secrets replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut redacted = self.clone();
        let mask = |value: &mut Option<String>| {
            if value.is_some() {
                *value = Some("********".into());
            }
        };
        mask(&mut redacted.signing_secret);
        mask(&mut redacted.client.identity_token);
        redacted.relay.tokens = redacted
            .relay
            .tokens
            .iter()
            .map(|_| "********".to_string())
            .collect();
        redacted
    }
}
