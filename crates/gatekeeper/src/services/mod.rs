//! Services used by the request pipeline.
//!
//! # Components
//!
//! - `rate_limiter` - sliding-window abuse counter (shared store)
//! - `geo_filter` - country allow-list check (external lookup, fail-open)
//! - `directory` - user-directory existence check (external, fail-closed)
//! - `anti_forgery` - stateless double-submit tokens
//! - `sessions` - opaque session ids (shared store)

pub mod anti_forgery;
pub mod directory;
pub mod geo_filter;
pub mod rate_limiter;
pub mod sessions;

pub use anti_forgery::{AntiForgeryTokenService, IssuedAntiForgeryToken};
pub use directory::{DirectoryClient, DirectoryError, UserDirectory};
pub use geo_filter::GeoFilter;
pub use rate_limiter::RateLimiter;
pub use sessions::SessionStore;
