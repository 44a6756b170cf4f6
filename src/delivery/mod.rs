//! Delivery core.
//!
//! Provides:
//! - Per-connection outbound queue and drain ownership token
//! - The single-flight trigger with recheck-after-release
//! - Async dispatch of triggers onto a blocking worker pool
//! - A registry routing operations by connection id

pub mod dispatch;
pub mod registry;
pub mod state;
pub mod trigger;

pub use dispatch::AsyncDeliverer;
pub use registry::DeliveryRegistry;
pub use state::ConnectionDeliveryState;
pub use trigger::{trigger, TriggerOutcome};
