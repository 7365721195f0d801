//! Session teardown.

use crate::errors::GateError;
use crate::middleware::gatekeeper::set_cookie;
use crate::middleware::{ANTI_FORGERY_COOKIE, SESSION_COOKIE};
use crate::routes::{AppState, ANTI_FORGERY_HEADER};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// Value of cookie `name` from the request's `Cookie` headers.
fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// `POST /logout`
///
/// Requires the anti-forgery header to match the anti-forgery cookie, then a
/// live session. Destroys the session and expires both cookies.
///
/// # Errors
///
/// - `GateError::AntiForgeryRejected` (403) - header/cookie pair missing or invalid
/// - `GateError::SessionInvalid` (401) - no live session
/// - `GateError::ServiceUnavailable` (503) - the store failed
#[tracing::instrument(skip_all, name = "gatekeeper.session.logout")]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, GateError> {
    let echoed = headers
        .get(ANTI_FORGERY_HEADER)
        .and_then(|h| h.to_str().ok());
    if !state
        .anti_forgery
        .verify(echoed, cookie(&headers, ANTI_FORGERY_COOKIE))
    {
        return Err(GateError::AntiForgeryRejected);
    }

    let session_id = cookie(&headers, SESSION_COOKIE).ok_or(GateError::SessionInvalid)?;
    if !state.sessions.validate(session_id).await {
        return Err(GateError::SessionInvalid);
    }

    state
        .sessions
        .destroy(session_id)
        .await
        .map_err(|e| GateError::ServiceUnavailable(format!("session delete: {e}")))?;

    tracing::info!(target: "gatekeeper.session", "Session destroyed");

    let secure = !state.config.debug;
    let mut response = Json(json!({ "message": "Logged out" })).into_response();
    for expired in [
        set_cookie(SESSION_COOKIE, "", 0, true, secure),
        set_cookie(ANTI_FORGERY_COOKIE, "", 0, false, secure),
    ] {
        let value = HeaderValue::from_str(&expired)
            .map_err(|e| GateError::Internal(format!("cookie header: {e}")))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}
