use super::{MAX_IDENTITY_CHARS, RelayState};
use crate::core::checkin::{cap_tags, truncate_message};
use crate::security::{is_fresh, token_matches};
use crate::transport::protocol::{
    AUTH_FAILURE_CLOSE_CODE, ClientMessage, ServerMessage, Submission,
};
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use chrono::Utc;

/// What the connection does after one inbound frame.
#[derive(Debug, PartialEq)]
pub(super) enum Disposition {
    /// Send these to the requester only, in order.
    Reply(Vec<ServerMessage>),
    /// Close the connection with this code.
    Close { code: u16, reason: String },
}

impl Disposition {
    fn none() -> Self {
        Self::Reply(Vec::new())
    }

    fn notice(message: impl Into<String>) -> Self {
        Self::Reply(vec![ServerMessage::error(message)])
    }

    fn reject_credentials(reason: &str) -> Self {
        Self::Close {
            code: AUTH_FAILURE_CLOSE_CODE,
            reason: reason.to_string(),
        }
    }
}

/// GET /health
pub(super) async fn handle_health(State(state): State<RelayState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "online": state.online_count(),
        "history": state.history_len(),
    });
    Json(body)
}

pub(super) fn handle_client_text(state: &RelayState, text: &str) -> Disposition {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::Checkin(submission)) => handle_submission(state, submission),
        Ok(ClientMessage::HistoryRequest) => replay_history(state),
        Ok(ClientMessage::OnlineUsersRequest) => {
            Disposition::Reply(vec![ServerMessage::online_users(state.online_count())])
        }
        Err(error) => {
            tracing::debug!("rejecting malformed client message: {error}");
            Disposition::notice(format!("invalid message: {error}"))
        }
    }
}

fn replay_history(state: &RelayState) -> Disposition {
    let replay = state
        .history
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .replay_order();
    let count = replay.len();
    let mut messages: Vec<ServerMessage> =
        replay.into_iter().map(ServerMessage::NewCheckin).collect();
    messages.push(ServerMessage::HistoryEnd { count });
    Disposition::Reply(messages)
}

fn handle_submission(state: &RelayState, submission: Submission) -> Disposition {
    let identity = submission.check_in.identity.trim();
    if identity.is_empty() {
        return Disposition::notice("identity must not be empty");
    }
    if identity.chars().count() > MAX_IDENTITY_CHARS {
        return Disposition::notice(format!(
            "identity exceeds {MAX_IDENTITY_CHARS} characters"
        ));
    }

    if state.config.relay.require_token {
        let authorized = submission
            .auth_token
            .as_deref()
            .is_some_and(|token| token_matches(token, &state.config.relay.tokens));
        if !authorized {
            tracing::warn!(identity = %identity, "check-in rejected: missing or unknown auth token");
            return Disposition::reject_credentials("invalid auth token");
        }
    }

    if let Some(verifier) = &state.verifier {
        let (Some(signature), Some(signing_timestamp)) =
            (submission.signature.as_deref(), submission.signing_timestamp)
        else {
            tracing::warn!(identity = %identity, "check-in rejected: unsigned");
            return Disposition::reject_credentials("signature required");
        };
        if !verifier.verify(&submission.check_in, signature, signing_timestamp) {
            tracing::warn!(identity = %identity, "check-in rejected: bad signature");
            return Disposition::reject_credentials("invalid signature");
        }
        if !is_fresh(
            signing_timestamp,
            Utc::now().timestamp_millis(),
            state.config.signature_window(),
        ) {
            tracing::warn!(identity = %identity, signing_timestamp, "check-in rejected: stale signature");
            return Disposition::notice("stale signature");
        }
        if !state.replay_guard.check_and_record(signature) {
            tracing::warn!(identity = %identity, "check-in rejected: replayed signature");
            return Disposition::notice("duplicate submission");
        }
    }

    if let Err(limited) = state.rate_limiter.check_and_record(identity) {
        let retry_secs = limited.remaining.as_secs().max(1);
        tracing::info!(identity = %identity, retry_secs, "check-in rate limited");
        return Disposition::notice(format!("rate limited: retry in {retry_secs}s"));
    }

    let mut check_in = submission.into_sanitized();
    check_in.identity = check_in.identity.trim().to_string();
    check_in.tags = cap_tags(check_in.tags);
    check_in.message = truncate_message(&check_in.message, state.config.max_message_chars);

    let changed = state
        .history
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .upsert(check_in.clone());
    if changed {
        tracing::info!(identity = %check_in.identity, tags = ?check_in.tags, "check-in accepted");
        state.broadcast(ServerMessage::NewCheckin(check_in));
    } else {
        tracing::debug!(identity = %check_in.identity, "check-in not newer than stored entry");
    }

    Disposition::none()
}
