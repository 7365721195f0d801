//! Gatekeeper library.
//!
//! Request admission for protected HTTP routes: rate limiting, country
//! filtering, identity-token verification, user-directory membership, second
//! factor, sessions and anti-forgery tokens.
//!
//! The binary in `main.rs` wires these together; integration tests use the
//! same wiring through `routes::AppState`.

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod pipeline;
pub mod routes;
pub mod services;
pub mod store;
