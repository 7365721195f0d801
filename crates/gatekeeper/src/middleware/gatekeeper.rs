//! Admission middleware for protected routes.
//!
//! Runs the [`Gatekeeper`](crate::pipeline::Gatekeeper) pipeline, injects the
//! verified claims into request extensions and, once the handler has run,
//! attaches the session and anti-forgery cookies to the response.

use crate::errors::GateError;
use crate::pipeline::Admission;
use crate::routes::{AppState, ANTI_FORGERY_HEADER};
use crate::services::anti_forgery::TOKEN_MAX_AGE_SECONDS;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::instrument;

/// Cookie holding the opaque session id.
pub const SESSION_COOKIE: &str = "session_id";

/// Cookie holding the signed anti-forgery token.
pub const ANTI_FORGERY_COOKIE: &str = "csrf_token";

/// Render a `Set-Cookie` value.
///
/// `secure` is off only in debug deployments served over plain HTTP.
pub(crate) fn set_cookie(
    name: &str,
    value: &str,
    max_age_seconds: u64,
    http_only: bool,
    secure: bool,
) -> String {
    let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age_seconds}");
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    cookie.push_str("; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn client_ip(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn append_admission_headers(
    response: &mut Response,
    state: &AppState,
    admission: &Admission,
) -> Result<(), GateError> {
    let secure = !state.config.debug;
    let cookies = [
        set_cookie(
            SESSION_COOKIE,
            &admission.session_id,
            state.sessions.ttl().as_secs(),
            true,
            secure,
        ),
        set_cookie(
            ANTI_FORGERY_COOKIE,
            &admission.anti_forgery.cookie_value,
            TOKEN_MAX_AGE_SECONDS.unsigned_abs(),
            false,
            secure,
        ),
    ];

    let headers = response.headers_mut();
    for cookie in cookies {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| GateError::Internal(format!("cookie header: {e}")))?;
        headers.append(header::SET_COOKIE, value);
    }

    let echo = HeaderValue::from_str(&admission.anti_forgery.value)
        .map_err(|e| GateError::Internal(format!("anti-forgery header: {e}")))?;
    headers.insert(ANTI_FORGERY_HEADER, echo);
    Ok(())
}

/// Admission middleware.
///
/// # Response
///
/// - The pipeline's rejection (403/401/400/429/500/503) if admission fails
/// - Otherwise the handler's response plus `Set-Cookie` for `session_id` and
///   `csrf_token` and an `X-CSRF-Token` header with the value to echo back
#[instrument(skip_all, name = "gatekeeper.middleware.admission")]
pub async fn require_gatekeeper(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, GateError> {
    let client_ip = client_ip(&req);
    // A header that is not valid UTF-8 is treated as absent.
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let admission = state
        .gatekeeper
        .admit(&client_ip, authorization.as_deref())
        .await?;

    req.extensions_mut().insert(admission.claims.clone());

    let mut response = next.run(req).await;
    append_admission_headers(&mut response, &state, &admission)?;
    Ok(response)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use std::collections::HashMap;
    use tower::ServiceExt;

    #[test]
    fn test_set_cookie_attributes() {
        assert_eq!(
            set_cookie("session_id", "abc", 86400, true, true),
            "session_id=abc; Path=/; Max-Age=86400; HttpOnly; SameSite=Lax; Secure"
        );
        assert_eq!(
            set_cookie("csrf_token", "v:1:s", 3600, false, false),
            "csrf_token=v:1:s; Path=/; Max-Age=3600; SameSite=Lax"
        );
    }

    #[test]
    fn test_client_ip_defaults_to_unknown() {
        let req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req), "unknown");

        let mut req = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 4], 5555))));
        assert_eq!(client_ip(&req), "198.51.100.4");
    }

    fn test_state() -> Arc<AppState> {
        let vars = HashMap::from([
            ("IDP_DOMAIN".to_string(), "idp.test".to_string()),
            ("IDP_AUDIENCE".to_string(), "api".to_string()),
            // Port 9 (discard) is never served in test environments.
            ("IDP_JWKS_URL".to_string(), "http://127.0.0.1:9/jwks.json".to_string()),
            ("DIRECTORY_URL".to_string(), "http://127.0.0.1:9".to_string()),
            ("DIRECTORY_API_KEY".to_string(), "key".to_string()),
            (
                "SECRET_KEY".to_string(),
                "middleware-test-secret-0123456789abcd".to_string(),
            ),
            ("DEBUG".to_string(), "true".to_string()),
        ]);
        let config = crate::config::Config::from_vars(&vars).unwrap();
        Arc::new(AppState::from_config(
            config,
            Arc::new(crate::store::MemoryStore::new()),
        ))
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/protected", get(|| async { "secret" }))
            .route_layer(middleware::from_fn_with_state(state, require_gatekeeper))
    }

    #[tokio::test]
    async fn test_missing_authorization_rejected() {
        let response = app(test_state())
            .oneshot(HttpRequest::builder().uri("/protected").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_wrong_scheme_rejected_with_challenge() {
        let request = HttpRequest::builder()
            .uri("/protected")
            .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();

        let response = app(test_state()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_some());
    }

    #[tokio::test]
    async fn test_non_utf8_authorization_treated_as_absent() {
        let request = HttpRequest::builder()
            .uri("/protected")
            .header(
                header::AUTHORIZATION,
                HeaderValue::from_bytes(b"Bearer \xff\xfe").unwrap(),
            )
            .body(Body::empty())
            .unwrap();

        let response = app(test_state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
