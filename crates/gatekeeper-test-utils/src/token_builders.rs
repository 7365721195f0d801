//! Builder for signed identity tokens.
//!
//! Defaults produce a token the test gatekeeper accepts: RS256, signed with
//! the given key, `kid` set to that key's id, audience [`TEST_AUDIENCE`],
//! issuer [`TEST_ISSUER`], one hour of validity, email `alice@example.com`.

use crate::crypto_fixtures::TestSigningKey;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, Header};
use serde_json::{json, Map, Value};

/// Identity provider domain used by test configurations.
pub const TEST_IDP_DOMAIN: &str = "idp.gatekeeper.test";

/// Issuer derived from [`TEST_IDP_DOMAIN`].
pub const TEST_ISSUER: &str = "https://idp.gatekeeper.test/";

/// Audience expected by test configurations.
pub const TEST_AUDIENCE: &str = "https://api.gatekeeper.test";

/// Email present in default tokens.
pub const TEST_EMAIL: &str = "alice@example.com";

/// Builder for signed test tokens.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .with_email("bob@example.com")
///     .with_mfa(true)
///     .sign(&TestSigningKey::primary());
/// ```
pub struct TestTokenBuilder {
    sub: String,
    email: Option<String>,
    aud: String,
    iss: String,
    exp: i64,
    mfa_enabled: Option<bool>,
    amr: Vec<String>,
    kid: Option<String>,
    omit_kid: bool,
}

impl TestTokenBuilder {
    pub fn new() -> Self {
        Self {
            sub: "auth0|test-user".to_string(),
            email: Some(TEST_EMAIL.to_string()),
            aud: TEST_AUDIENCE.to_string(),
            iss: TEST_ISSUER.to_string(),
            exp: (Utc::now() + Duration::seconds(3600)).timestamp(),
            mfa_enabled: None,
            amr: Vec::new(),
            kid: None,
            omit_kid: false,
        }
    }

    pub fn for_subject(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn without_email(mut self) -> Self {
        self.email = None;
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.aud = audience.to_string();
        self
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.iss = issuer.to_string();
        self
    }

    /// Expiry in seconds from now (negative for already expired).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set the `mfa_enabled` claim.
    pub fn with_mfa(mut self, enabled: bool) -> Self {
        self.mfa_enabled = Some(enabled);
        self
    }

    /// Add an authentication-method reference (`amr`).
    pub fn with_amr(mut self, method: &str) -> Self {
        self.amr.push(method.to_string());
        self
    }

    /// Override the header `kid` (defaults to the signing key's id).
    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    /// Leave `kid` out of the header entirely.
    pub fn without_kid(mut self) -> Self {
        self.omit_kid = true;
        self
    }

    /// Claims as a JSON object.
    pub fn claims(&self) -> Value {
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!(self.sub));
        claims.insert("aud".to_string(), json!(self.aud));
        claims.insert("iss".to_string(), json!(self.iss));
        claims.insert("exp".to_string(), json!(self.exp));
        claims.insert("iat".to_string(), json!(Utc::now().timestamp()));
        if let Some(email) = &self.email {
            claims.insert("email".to_string(), json!(email));
        }
        if let Some(mfa) = self.mfa_enabled {
            claims.insert("mfa_enabled".to_string(), json!(mfa));
        }
        if !self.amr.is_empty() {
            claims.insert("amr".to_string(), json!(self.amr));
        }
        Value::Object(claims)
    }

    /// Sign with `key` (RS256) and return the compact token.
    pub fn sign(self, key: &TestSigningKey) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = if self.omit_kid {
            None
        } else {
            Some(self.kid.clone().unwrap_or_else(|| key.kid.to_string()))
        };

        encode(&header, &self.claims(), &key.encoding_key()).expect("test token signs")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_claims() {
        let claims = TestTokenBuilder::new().claims();
        assert_eq!(claims["aud"], TEST_AUDIENCE);
        assert_eq!(claims["iss"], TEST_ISSUER);
        assert_eq!(claims["email"], TEST_EMAIL);
        assert!(claims.get("mfa_enabled").is_none());
        assert!(claims["exp"].as_i64().unwrap() > Utc::now().timestamp());
    }

    #[test]
    fn test_overrides() {
        let claims = TestTokenBuilder::new()
            .without_email()
            .with_mfa(true)
            .with_amr("mfa")
            .expires_in(-10)
            .claims();
        assert!(claims.get("email").is_none());
        assert_eq!(claims["mfa_enabled"], true);
        assert_eq!(claims["amr"][0], "mfa");
        assert!(claims["exp"].as_i64().unwrap() < Utc::now().timestamp());
    }

    #[test]
    fn test_signed_header_carries_kid() {
        let key = TestSigningKey::primary();

        let token = TestTokenBuilder::new().sign(&key);
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some(key.kid));

        let token = TestTokenBuilder::new().without_kid().sign(&key);
        assert!(jsonwebtoken::decode_header(&token).unwrap().kid.is_none());
    }
}
