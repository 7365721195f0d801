//! Double-submit anti-forgery tokens.
//!
//! # Format
//!
//! The cookie carries `value:timestamp:signature` where
//! - `value` is 32 CSPRNG bytes, base64url without padding
//! - `timestamp` is issuance time in Unix seconds
//! - `signature` is hex HMAC-SHA256 over `value:timestamp`, keyed by the
//!   process secret
//!
//! The bare `value` is handed to the client separately and must be echoed in
//! a request header. A cross-site request cannot read the cookie, so it cannot
//! produce the matching header. No server-side state is kept.

use crate::errors::GateError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use ring::{hmac, rand};
use secrecy::{ExposeSecret, SecretString};

/// Token lifetime in seconds (one hour).
pub const TOKEN_MAX_AGE_SECONDS: i64 = 3600;

const VALUE_BYTES: usize = 32;

/// Result of [`AntiForgeryTokenService::issue`].
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedAntiForgeryToken {
    /// Bare value the client echoes back in a header.
    pub value: String,
    /// Combined `value:timestamp:signature` stored in the cookie.
    pub cookie_value: String,
}

impl std::fmt::Debug for IssuedAntiForgeryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedAntiForgeryToken")
            .field("value", &"[REDACTED]")
            .field("cookie_value", &"[REDACTED]")
            .finish()
    }
}

/// Issues and verifies anti-forgery tokens with the local signing secret.
pub struct AntiForgeryTokenService {
    key: hmac::Key,
    rng: rand::SystemRandom,
}

impl AntiForgeryTokenService {
    pub fn new(secret: &SecretString) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.expose_secret().as_bytes()),
            rng: rand::SystemRandom::new(),
        }
    }

    /// Issue a fresh token.
    pub fn issue(&self) -> Result<IssuedAntiForgeryToken, GateError> {
        self.issue_at(Utc::now().timestamp())
    }

    /// [`issue`](Self::issue) with an explicit Unix timestamp.
    pub fn issue_at(&self, timestamp: i64) -> Result<IssuedAntiForgeryToken, GateError> {
        let mut bytes = [0u8; VALUE_BYTES];
        rand::SecureRandom::fill(&self.rng, &mut bytes)
            .map_err(|_| GateError::Internal("CSPRNG failure".to_string()))?;
        let value = URL_SAFE_NO_PAD.encode(bytes);

        let tag = hmac::sign(&self.key, format!("{value}:{timestamp}").as_bytes());
        let cookie_value = format!("{value}:{timestamp}:{}", hex::encode(tag.as_ref()));

        Ok(IssuedAntiForgeryToken {
            value,
            cookie_value,
        })
    }

    /// Verify an echoed value against the issued cookie value.
    ///
    /// Never errors: anything missing, malformed, mismatched, forged or older
    /// than one hour is `false`.
    pub fn verify(&self, supplied_value: Option<&str>, cookie_value: Option<&str>) -> bool {
        self.verify_at(supplied_value, cookie_value, Utc::now().timestamp())
    }

    /// [`verify`](Self::verify) against an explicit Unix timestamp.
    pub fn verify_at(
        &self,
        supplied_value: Option<&str>,
        cookie_value: Option<&str>,
        now: i64,
    ) -> bool {
        let (Some(supplied), Some(cookie)) = (supplied_value, cookie_value) else {
            return false;
        };
        if supplied.is_empty() || cookie.is_empty() {
            return false;
        }

        let parts: Vec<&str> = cookie.split(':').collect();
        let [value, timestamp, signature] = parts.as_slice() else {
            return false;
        };

        if supplied != *value {
            return false;
        }

        let Ok(issued_at) = timestamp.parse::<i64>() else {
            return false;
        };
        match now.checked_sub(issued_at) {
            Some(age) if age <= TOKEN_MAX_AGE_SECONDS => {}
            _ => return false,
        }

        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        hmac::verify(
            &self.key,
            format!("{value}:{timestamp}").as_bytes(),
            &signature,
        )
        .is_ok()
    }
}
