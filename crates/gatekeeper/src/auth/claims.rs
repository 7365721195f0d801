//! Identity token claims.
//!
//! [`TokenClaims`] is the wire shape decoded from a verified token;
//! [`VerifiedClaims`] is the immutable identity handed to the rest of the
//! pipeline. Subject and email are redacted in Debug output to keep them out
//! of logs.

use serde::Deserialize;
use std::fmt;

/// `aud` may be a single string or an array of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud],
            Audience::Many(auds) => auds,
        }
    }
}

/// Claims as they appear in the token payload.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenClaims {
    pub sub: String,
    pub aud: Audience,
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mfa_enabled: Option<bool>,
    /// Authentication methods references (RFC 8176).
    #[serde(default)]
    pub amr: Vec<String>,
}

impl TokenClaims {
    pub(crate) fn into_verified(self) -> VerifiedClaims {
        let second_factor =
            self.mfa_enabled == Some(true) || self.amr.iter().any(|m| m == "mfa");
        VerifiedClaims {
            subject: self.sub,
            email: self.email,
            audience: self.aud.into_vec(),
            issuer: self.iss,
            expires_at: self.exp,
            second_factor,
        }
    }
}

/// Identity produced by successful token verification. Read-only once built.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedClaims {
    subject: String,
    email: Option<String>,
    audience: Vec<String>,
    issuer: String,
    expires_at: i64,
    second_factor: bool,
}

impl VerifiedClaims {
    /// Build claims directly, for callers that already hold a verified identity
    /// (session restoration, tests of downstream components).
    pub fn new(
        subject: impl Into<String>,
        email: Option<String>,
        audience: Vec<String>,
        issuer: impl Into<String>,
        expires_at: i64,
        second_factor: bool,
    ) -> Self {
        Self {
            subject: subject.into(),
            email,
            audience,
            issuer: issuer.into(),
            expires_at,
            second_factor,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Expiry instant, Unix epoch seconds.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Whether the identity provider reports a satisfied second factor.
    pub fn second_factor(&self) -> bool {
        self.second_factor
    }
}

impl fmt::Debug for VerifiedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedClaims")
            .field("subject", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field("expires_at", &self.expires_at)
            .field("second_factor", &self.second_factor)
            .finish()
    }
}
