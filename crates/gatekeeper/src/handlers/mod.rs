//! HTTP request handlers.

pub mod health;
pub mod metrics;
pub mod protected;
pub mod session;

pub use health::{health_check, readiness_check, root};
pub use metrics::metrics_handler;
pub use protected::protected;
pub use session::logout;
