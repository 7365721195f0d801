//! HTTP metrics middleware.
//!
//! Records every response, including the ones produced before a handler
//! runs (404, 405, pipeline rejections, timeouts).

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Records method, normalized path, status and duration for every request.
///
/// Applied as the outermost layer.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
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
    use tower::ServiceExt;

    fn test_app() -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route(
                "/protected",
                get(|| async { (StatusCode::FORBIDDEN, "denied") }),
            )
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    async fn status_of(uri: &str) -> StatusCode {
        let request = HttpRequest::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request builder should succeed");
        test_app()
            .oneshot(request)
            .await
            .expect("request should succeed")
            .status()
    }

    #[tokio::test]
    async fn test_passes_responses_through() {
        assert_eq!(status_of("/health").await, StatusCode::OK);
        assert_eq!(status_of("/protected").await, StatusCode::FORBIDDEN);
        assert_eq!(status_of("/nonexistent").await, StatusCode::NOT_FOUND);
    }
}
