//! JSON messages exchanged between clients and the relay. Every message is
//! an object with a `type` discriminator.

use crate::core::CheckIn;
use crate::error::ParseError;
use serde::{Deserialize, Serialize};

/// Close code the relay uses when credentials are rejected.
pub const AUTH_FAILURE_CLOSE_CODE: u16 = 4001;

/// A check-in as submitted by a client, with its credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(flatten)]
    pub check_in: CheckIn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_timestamp: Option<i64>,
}

impl Submission {
    pub fn unsigned(check_in: CheckIn) -> Self {
        Self {
            check_in,
            auth_token: None,
            signature: None,
            signing_timestamp: None,
        }
    }

    /// The check-in with token and signature stripped, as broadcast.
    pub fn into_sanitized(self) -> CheckIn {
        self.check_in
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Checkin(Submission),
    OnlineUsersRequest,
    HistoryRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    NewCheckin(CheckIn),
    OnlineUsers { count: u64 },
    /// Marks the end of a history replay.
    HistoryEnd { count: usize },
    Error { message: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"history_request"}"#.to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn online_users(count: usize) -> Self {
        Self::OnlineUsers {
            count: u64::try_from(count).unwrap_or(u64::MAX),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","message":"serialization failed"}"#.to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        Ok(serde_json::from_str(raw)?)
    }
}
