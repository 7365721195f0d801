//! Observability: Prometheus metrics.
//!
//! Logging is plain `tracing` with per-module targets; the subscriber is set
//! up in `main.rs`.

pub mod metrics;
