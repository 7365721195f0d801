//! The admission pipeline.
//!
//! Every protected request runs these checks in order and stops at the first
//! rejection:
//!
//! 1. rate limit (per client address)
//! 2. country allow-list
//! 3. bearer credential extraction
//! 4. token verification
//! 5. email claim presence and shape
//! 6. user-directory membership
//! 7. second factor (when enforced)
//! 8. session creation
//! 9. anti-forgery token issuance
//!
//! Nothing already done is rolled back when a later step fails. A rate-limit
//! attempt stays recorded even if the request is rejected further down.

use crate::auth::{TokenVerifier, VerifiedClaims};
use crate::errors::GateError;
use crate::observability::metrics;
use crate::services::{
    AntiForgeryTokenService, DirectoryError, GeoFilter, IssuedAntiForgeryToken, RateLimiter,
    SessionStore, UserDirectory,
};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::instrument;

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

fn email_regex() -> Option<&'static Regex> {
    static EMAIL_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_REGEX
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
}

/// Whether `email` has an acceptable shape.
pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_some_and(|re| re.is_match(email))
}

/// Pull the credential out of an `Authorization` header value.
///
/// The scheme must be exactly `Bearer`.
///
/// # Errors
///
/// - `GateError::AuthRequired` - header absent, blank, or `Bearer` with no credential
/// - `GateError::InvalidScheme` - any other scheme
pub fn extract_bearer(header: Option<&str>) -> Result<&str, GateError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or_else(|| {
        tracing::debug!(target: "gatekeeper.pipeline", "Missing Authorization header");
        GateError::AuthRequired
    })?;

    let (scheme, credential) = header.split_once(' ').unwrap_or((header, ""));
    if scheme != "Bearer" {
        tracing::debug!(target: "gatekeeper.pipeline", "Unsupported authorization scheme");
        return Err(GateError::InvalidScheme);
    }

    let credential = credential.trim();
    if credential.is_empty() {
        return Err(GateError::AuthRequired);
    }
    Ok(credential)
}

/// Outcome of a successful admission.
#[derive(Debug, Clone)]
pub struct Admission {
    pub claims: VerifiedClaims,
    pub session_id: String,
    pub anti_forgery: IssuedAntiForgeryToken,
}

/// Runs the admission checks for protected requests.
pub struct Gatekeeper {
    rate_limiter: RateLimiter,
    geo_filter: GeoFilter,
    verifier: TokenVerifier,
    directory: Arc<dyn UserDirectory>,
    sessions: Arc<SessionStore>,
    anti_forgery: Arc<AntiForgeryTokenService>,
    require_second_factor: bool,
}

impl Gatekeeper {
    pub fn new(
        rate_limiter: RateLimiter,
        geo_filter: GeoFilter,
        verifier: TokenVerifier,
        directory: Arc<dyn UserDirectory>,
        sessions: Arc<SessionStore>,
        anti_forgery: Arc<AntiForgeryTokenService>,
        require_second_factor: bool,
    ) -> Self {
        Self {
            rate_limiter,
            geo_filter,
            verifier,
            directory,
            sessions,
            anti_forgery,
            require_second_factor,
        }
    }

    /// Admit or reject a request from `client_ip` carrying `authorization`.
    #[instrument(skip_all, name = "gatekeeper.pipeline.admit")]
    pub async fn admit(
        &self,
        client_ip: &str,
        authorization: Option<&str>,
    ) -> Result<Admission, GateError> {
        let result = self.run(client_ip, authorization).await;
        match &result {
            Ok(_) => metrics::record_gate_decision("admitted"),
            Err(e) => {
                metrics::record_gate_decision(e.code());
                tracing::info!(target: "gatekeeper.pipeline", code = e.code(), "Request rejected");
            }
        }
        result
    }

    async fn run(
        &self,
        client_ip: &str,
        authorization: Option<&str>,
    ) -> Result<Admission, GateError> {
        let limited = self.rate_limiter.check(client_ip).await.map_err(|e| {
            GateError::ServiceUnavailable(format!("rate limiter store: {e}"))
        })?;
        if limited {
            return Err(GateError::TooManyRequests);
        }

        if !self.geo_filter.allowed(client_ip).await {
            return Err(GateError::RegionBlocked);
        }

        let token = extract_bearer(authorization)?;

        let claims = self.verifier.verify(token).await.map_err(|e| match e {
            GateError::InvalidToken
            | GateError::ExpiredToken
            | GateError::KeyServiceUnavailable(_) => e,
            other => {
                tracing::debug!(target: "gatekeeper.pipeline", error = %other, "Unexpected verification failure");
                GateError::InvalidToken
            }
        })?;

        let email = claims.email().ok_or_else(|| {
            tracing::debug!(target: "gatekeeper.pipeline", "Token has no email claim");
            GateError::AuthRequired
        })?;
        if !is_valid_email(email) {
            return Err(GateError::MalformedEmail);
        }

        match self.directory.user_exists(email).await {
            Ok(true) => {}
            Ok(false) => return Err(GateError::NotAuthorized),
            Err(DirectoryError::Misconfigured(status)) => {
                return Err(GateError::ServiceMisconfigured(format!(
                    "directory rejected API key with status {status}"
                )));
            }
            Err(DirectoryError::Unavailable(reason)) => {
                return Err(GateError::DirectoryUnavailable(reason));
            }
        }

        if self.require_second_factor && !claims.second_factor() {
            return Err(GateError::SecondFactorRequired);
        }

        let session_id = self.sessions.create(&claims).await?;
        let anti_forgery = self.anti_forgery.issue()?;

        Ok(Admission {
            claims,
            session_id,
            anti_forgery,
        })
    }
}
