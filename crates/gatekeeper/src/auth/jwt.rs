//! Identity token verification.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only RS256 is accepted; the header's `alg` never selects the algorithm
//! - Audience, issuer and expiry are checked with zero leeway
//! - Expiry failures are reported separately from every other failure

use crate::auth::claims::{TokenClaims, VerifiedClaims};
use crate::auth::jwks::{Jwk, KeySetFetch, SigningKeyCache};
use crate::errors::GateError;
use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use tracing::instrument;

/// Maximum accepted token size in bytes.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

/// Verifies bearer tokens against the identity provider's signing keys.
pub struct TokenVerifier {
    key_cache: Arc<SigningKeyCache>,
    audience: String,
    issuer: String,
}

impl TokenVerifier {
    pub fn new(key_cache: Arc<SigningKeyCache>, audience: String, issuer: String) -> Self {
        Self {
            key_cache,
            audience,
            issuer,
        }
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    ///
    /// - `GateError::ExpiredToken` - signature valid, `exp` not in the future
    /// - `GateError::KeyServiceUnavailable` - no key set could be obtained
    /// - `GateError::InvalidToken` - every other failure
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, GateError> {
        if token.len() > MAX_TOKEN_SIZE_BYTES {
            tracing::debug!(
                target: "gatekeeper.auth.jwt",
                token_size = token.len(),
                "Token rejected: size exceeds maximum"
            );
            return Err(GateError::InvalidToken);
        }

        let header = decode_header(token).map_err(|e| {
            tracing::debug!(target: "gatekeeper.auth.jwt", error = %e, "Token header unreadable");
            GateError::InvalidToken
        })?;

        if header.alg != Algorithm::RS256 {
            tracing::warn!(target: "gatekeeper.auth.jwt", alg = ?header.alg, "Token header names a non-RS256 algorithm");
            return Err(GateError::InvalidToken);
        }

        let kid = header.kid.filter(|k| !k.is_empty()).ok_or_else(|| {
            tracing::debug!(target: "gatekeeper.auth.jwt", "Token missing kid");
            GateError::InvalidToken
        })?;

        let key_set = match self.key_cache.fetch().await {
            KeySetFetch::Fresh(set) => set,
            KeySetFetch::Stale(set) => {
                tracing::warn!(target: "gatekeeper.auth.jwt", "Verifying against stale signing keys");
                set
            }
            KeySetFetch::Unavailable => {
                return Err(GateError::KeyServiceUnavailable(
                    "no signing keys available".to_string(),
                ));
            }
        };

        let jwk = key_set.get(&kid).ok_or_else(|| {
            tracing::debug!(target: "gatekeeper.auth.jwt", kid = %kid, "Unknown signing key id");
            GateError::InvalidToken
        })?;

        let claims = self.verify_with_key(token, jwk)?;

        tracing::debug!(target: "gatekeeper.auth.jwt", "Token verified");
        Ok(claims)
    }

    fn verify_with_key(&self, token: &str, jwk: &Jwk) -> Result<VerifiedClaims, GateError> {
        let decoding_key = rsa_decoding_key(jwk)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

        let data = decode::<TokenClaims>(token, &decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => GateError::ExpiredToken,
                _ => {
                    tracing::debug!(target: "gatekeeper.auth.jwt", error = %e, "Token verification failed");
                    GateError::InvalidToken
                }
            }
        })?;

        // The library accepts exp == now; expiry must be strictly in the future.
        if data.claims.exp <= chrono::Utc::now().timestamp() {
            return Err(GateError::ExpiredToken);
        }

        Ok(data.claims.into_verified())
    }
}

fn rsa_decoding_key(jwk: &Jwk) -> Result<DecodingKey, GateError> {
    if jwk.kty != "RSA" {
        tracing::warn!(target: "gatekeeper.auth.jwt", kty = %jwk.kty, "Unexpected JWK key type");
        return Err(GateError::InvalidToken);
    }
    if let Some(alg) = &jwk.alg {
        if alg != "RS256" {
            tracing::warn!(target: "gatekeeper.auth.jwt", alg = %alg, "Unexpected JWK algorithm");
            return Err(GateError::InvalidToken);
        }
    }

    let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
        tracing::error!(target: "gatekeeper.auth.jwt", "RSA JWK missing modulus or exponent");
        return Err(GateError::InvalidToken);
    };

    DecodingKey::from_rsa_components(n, e).map_err(|err| {
        tracing::error!(target: "gatekeeper.auth.jwt", error = %err, "Invalid RSA key components");
        GateError::InvalidToken
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use gatekeeper_test_utils::{TestSigningKey, TestTokenBuilder, TEST_AUDIENCE, TEST_ISSUER};

    fn verifier_without_keys() -> TokenVerifier {
        // Port 9 (discard) is never served in test environments.
        let cache = SigningKeyCache::new("http://127.0.0.1:9/.well-known/jwks.json".to_string());
        TokenVerifier::new(
            Arc::new(cache),
            "api".to_string(),
            "https://idp.test/".to_string(),
        )
    }

    fn unsigned_token(header: &str) -> String {
        let header_b64 = URL_SAFE_NO_PAD.encode(header.as_bytes());
        let payload_b64 = URL_SAFE_NO_PAD.encode(br#"{"sub":"s","exp":9999999999}"#);
        format!("{header_b64}.{payload_b64}.c2ln")
    }

    fn jwk(kty: &str, alg: Option<&str>) -> Jwk {
        Jwk {
            kty: kty.to_string(),
            kid: Some("k".to_string()),
            n: Some("AQAB".to_string()),
            e: Some("AQAB".to_string()),
            alg: alg.map(str::to_string),
            key_use: None,
        }
    }

    fn verifier_for_test_issuer() -> TokenVerifier {
        let cache = SigningKeyCache::new("http://127.0.0.1:9/.well-known/jwks.json".to_string());
        TokenVerifier::new(
            Arc::new(cache),
            TEST_AUDIENCE.to_string(),
            TEST_ISSUER.to_string(),
        )
    }

    fn primary_jwk() -> Jwk {
        serde_json::from_value(TestSigningKey::primary().jwk_json()).unwrap()
    }

    #[test]
    fn test_token_expiring_now_is_expired() {
        let token = TestTokenBuilder::new()
            .expires_in(0)
            .sign(&TestSigningKey::primary());

        assert_eq!(
            verifier_for_test_issuer().verify_with_key(&token, &primary_jwk()),
            Err(GateError::ExpiredToken)
        );
    }

    #[test]
    fn test_token_expiring_later_verifies() {
        let token = TestTokenBuilder::new()
            .expires_in(60)
            .sign(&TestSigningKey::primary());

        let claims = verifier_for_test_issuer()
            .verify_with_key(&token, &primary_jwk())
            .unwrap();
        assert_eq!(claims.issuer(), TEST_ISSUER);
    }

    #[tokio::test]
    async fn test_oversized_token_rejected_before_parsing() {
        let token = "a".repeat(MAX_TOKEN_SIZE_BYTES + 1);
        let result = verifier_without_keys().verify(&token).await;
        assert_eq!(result.unwrap_err(), GateError::InvalidToken);
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        for token in ["", "abc", "a.b.c", "!!!.payload.sig"] {
            let result = verifier_without_keys().verify(token).await;
            assert_eq!(result.unwrap_err(), GateError::InvalidToken, "token {token:?}");
        }
    }

    #[tokio::test]
    async fn test_missing_kid_rejected() {
        let token = unsigned_token(r#"{"alg":"RS256","typ":"JWT"}"#);
        let result = verifier_without_keys().verify(&token).await;
        assert_eq!(result.unwrap_err(), GateError::InvalidToken);
    }

    #[tokio::test]
    async fn test_empty_kid_rejected() {
        let token = unsigned_token(r#"{"alg":"RS256","typ":"JWT","kid":""}"#);
        let result = verifier_without_keys().verify(&token).await;
        assert_eq!(result.unwrap_err(), GateError::InvalidToken);
    }

    #[tokio::test]
    async fn test_symmetric_algorithm_header_rejected() {
        let token = unsigned_token(r#"{"alg":"HS256","typ":"JWT","kid":"k"}"#);
        let result = verifier_without_keys().verify(&token).await;
        assert_eq!(result.unwrap_err(), GateError::InvalidToken);
    }

    #[tokio::test]
    async fn test_unreachable_key_service_with_empty_cache() {
        let token = unsigned_token(r#"{"alg":"RS256","typ":"JWT","kid":"k"}"#);
        let result = verifier_without_keys().verify(&token).await;
        assert!(matches!(
            result.unwrap_err(),
            GateError::KeyServiceUnavailable(_)
        ));
    }

    #[test]
    fn test_non_rsa_jwk_rejected() {
        assert!(rsa_decoding_key(&jwk("OKP", None)).is_err());
        assert!(rsa_decoding_key(&jwk("EC", Some("ES256"))).is_err());
    }

    #[test]
    fn test_rsa_jwk_with_other_alg_rejected() {
        assert!(rsa_decoding_key(&jwk("RSA", Some("RS512"))).is_err());
    }

    #[test]
    fn test_rsa_jwk_missing_components_rejected() {
        let mut key = jwk("RSA", Some("RS256"));
        key.n = None;
        assert!(rsa_decoding_key(&key).is_err());
    }

    #[test]
    fn test_max_token_size_constant() {
        assert_eq!(MAX_TOKEN_SIZE_BYTES, 8192);
    }
}
