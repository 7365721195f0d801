//! Example protected resource.

use crate::auth::VerifiedClaims;
use axum::{Extension, Json};
use serde_json::{json, Value};

/// `GET /protected`
///
/// Only reachable through the admission middleware, which places the
/// verified claims in the request extensions.
pub async fn protected(Extension(claims): Extension<VerifiedClaims>) -> Json<Value> {
    Json(json!({
        "message": "Access granted",
        "user": claims.email(),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_email() {
        let claims = VerifiedClaims::new(
            "auth0|1",
            Some("alice@example.com".to_string()),
            vec!["api".to_string()],
            "https://idp.test/",
            4_000_000_000,
            false,
        );

        let Json(body) = protected(Extension(claims)).await;

        assert_eq!(body["message"], "Access granted");
        assert_eq!(body["user"], "alice@example.com");
    }
}
