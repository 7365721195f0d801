//! HTTP middleware.
//!
//! # Components
//!
//! - `gatekeeper` - admission pipeline for protected routes
//! - `http_metrics` - HTTP request metrics

pub mod gatekeeper;
pub mod http_metrics;

pub use gatekeeper::{require_gatekeeper, ANTI_FORGERY_COOKIE, SESSION_COOKIE};
pub use http_metrics::http_metrics_middleware;
