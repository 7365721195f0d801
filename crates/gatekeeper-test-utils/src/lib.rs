//! # Gatekeeper Test Utilities
//!
//! Shared test utilities for the gatekeeper.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed RSA keys and their JWKs)
//! - Token builders (`TestTokenBuilder`)
//! - wiremock upstreams (identity provider, user directory, geolocation)
//! - Server test harness (`TestGatekeeperServer` for E2E tests)

pub mod crypto_fixtures;
pub mod mock_upstreams;
pub mod server_harness;
pub mod token_builders;

pub use crypto_fixtures::*;
pub use mock_upstreams::*;
pub use server_harness::*;
pub use token_builders::*;
