//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging via `tracing`
//! - OpenTelemetry counters for drain activity

pub mod metrics;
pub mod tracing;
