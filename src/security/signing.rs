//! HMAC-SHA256 signatures binding a check-in to the moment it was signed.
//!
//! The signed string is the canonical payload followed by `.` and the
//! signing timestamp in Unix milliseconds. The relay recomputes it from the
//! fields it received, so the canonical form must not depend on serializer
//! field order.

use crate::core::CheckIn;
use crate::error::ConfigError;
use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Wire discriminator bound into every signature.
pub const SIGNED_MESSAGE_TYPE: &str = "checkin";

/// Default freshness window for signing timestamps.
pub const DEFAULT_SIGNATURE_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Lowercase hex HMAC.
    pub value: String,
    /// Unix milliseconds.
    pub signing_timestamp: i64,
}

pub struct Signer {
    key: Zeroizing<Vec<u8>>,
}

impl Signer {
    pub fn new(secret: &str) -> Result<Self, ConfigError> {
        if secret.is_empty() {
            return Err(ConfigError::Validation(
                "signing_secret must not be empty".into(),
            ));
        }
        Ok(Self {
            key: Zeroizing::new(secret.as_bytes().to_vec()),
        })
    }

    pub fn sign(&self, check_in: &CheckIn) -> Signature {
        let signing_timestamp = Utc::now().timestamp_millis();
        Signature {
            value: self.sign_at(check_in, signing_timestamp),
            signing_timestamp,
        }
    }

    pub fn sign_at(&self, check_in: &CheckIn, signing_timestamp: i64) -> String {
        let mac = self.mac_for(check_in, signing_timestamp);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature.
    pub fn verify(&self, check_in: &CheckIn, signature_hex: &str, signing_timestamp: i64) -> bool {
        let Ok(expected) = hex::decode(signature_hex) else {
            return false;
        };
        self.mac_for(check_in, signing_timestamp)
            .verify_slice(&expected)
            .is_ok()
    }

    fn mac_for(&self, check_in: &CheckIn, signing_timestamp: i64) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(canonical_payload(check_in).as_bytes());
        mac.update(b".");
        mac.update(signing_timestamp.to_string().as_bytes());
        mac
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

/// Deterministic rendering of the signed fields, in fixed order:
/// type, identity, tags, message, timestamp, avatarRef, decorativeSnippet.
pub fn canonical_payload(check_in: &CheckIn) -> String {
    serde_json::json!([
        SIGNED_MESSAGE_TYPE,
        check_in.identity,
        check_in.tags,
        check_in.message,
        check_in
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        check_in.avatar_ref,
        check_in.decorative_snippet,
    ])
    .to_string()
}

/// Whether `signing_timestamp` lies within `window` of `now_millis`, in
/// either direction.
pub fn is_fresh(signing_timestamp: i64, now_millis: i64, window: Duration) -> bool {
    let window_millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
    now_millis.abs_diff(signing_timestamp) <= window_millis
}
