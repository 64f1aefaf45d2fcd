//! The check-in record shared by the client core, the relay and the wire.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of activity tags carried by a check-in.
pub const MAX_TAGS: usize = 3;
/// Default message bound, in UTF-16 code units.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 42;

/// A timestamped presence broadcast from one identity.
///
/// Instances are never mutated after construction; a newer check-in for the
/// same identity supersedes an older one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub identity: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decorative_snippet: Option<String>,
}

impl CheckIn {
    /// Build a normalized check-in stamped with the current time.
    ///
    /// Tags past [`MAX_TAGS`] are dropped and the message is truncated to
    /// `max_message_chars`; neither is ever rejected.
    pub fn compose(
        identity: impl Into<String>,
        tags: Vec<String>,
        message: &str,
        max_message_chars: usize,
    ) -> Self {
        Self::compose_at(identity, tags, message, max_message_chars, Utc::now())
    }

    pub fn compose_at(
        identity: impl Into<String>,
        tags: Vec<String>,
        message: &str,
        max_message_chars: usize,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            identity: identity.into(),
            tags: cap_tags(tags),
            message: truncate_message(message, max_message_chars),
            timestamp: timestamp.trunc_subsecs(3),
            avatar_ref: None,
            decorative_snippet: None,
        }
    }

    pub fn with_avatar(mut self, avatar_ref: Option<String>) -> Self {
        self.avatar_ref = avatar_ref.filter(|uri| !uri.trim().is_empty());
        self
    }

    pub fn with_snippet(mut self, snippet: Option<String>) -> Self {
        self.decorative_snippet = snippet;
        self
    }

    /// Initials shown when no avatar is available.
    pub fn initials(&self) -> String {
        let initials: String = self
            .identity
            .split(|c: char| c.is_whitespace() || c == '-' || c == '_' || c == '.')
            .filter_map(|part| part.chars().next())
            .take(2)
            .flat_map(char::to_uppercase)
            .collect();
        if initials.is_empty() {
            "?".to_string()
        } else {
            initials
        }
    }
}

/// Truncate `message` to at most `max_units` UTF-16 code units.
///
/// A surrogate pair straddling the bound is dropped whole, so the result may
/// be one unit shorter than `max_units`.
#[must_use]
pub fn truncate_message(message: &str, max_units: usize) -> String {
    let mut units = 0;
    for (idx, ch) in message.char_indices() {
        units += ch.len_utf16();
        if units > max_units {
            return message[..idx].to_string();
        }
    }
    message.to_string()
}

/// Keep the first [`MAX_TAGS`] non-blank tags, preserving their order.
pub fn cap_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .take(MAX_TAGS)
        .collect()
}
