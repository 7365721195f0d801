//! Identity token verification.
//!
//! - `jwks` - signing-key cache with TTL and stale fallback
//! - `jwt` - RS256 token verification against the cached keys
//! - `claims` - verified identity

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::VerifiedClaims;
pub use jwks::{KeySetFetch, SigningKeyCache, SigningKeySet};
pub use jwt::TokenVerifier;
