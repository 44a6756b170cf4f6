//! Outflow: single-flight asynchronous delivery for per-connection outbound queues.
//!
//! Many producers enqueue messages for a connection and ask for delivery.
//! At most one thread drains a given connection at any instant, triggering
//! never blocks, and a message enqueued while a drain is finishing is never
//! stranded.
//!
//! # Architecture
//!
//! - **Ownership token**: a per-connection atomic flag acquired with a
//!   compare-and-swap, never a blocking lock
//! - **Recheck after release**: the last owner of a drain cycle looks at
//!   the queue again after giving up ownership, closing the lost-wakeup window
//! - **Async dispatch**: drains run on tokio's blocking pool so triggering
//!   threads are never charged for transport I/O
//! - **Observable**: `tracing` logs and OpenTelemetry counters
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration for the soak binary
//! - [`delivery`]: delivery state, trigger protocol, dispatch and registry
//! - [`error`]: error taxonomy
//! - [`memory`]: in-memory recording transport
//! - [`observability`]: metrics and tracing setup
//! - [`soak`]: multi-producer soak run
//! - [`transport`]: outbound transport contract
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use outflow::delivery::{trigger, ConnectionDeliveryState};
//! use outflow::memory::MemoryTransport;
//! use outflow::ConnectionId;
//!
//! let transport = Arc::new(MemoryTransport::<&str>::new());
//! let id = ConnectionId::new();
//! let state = ConnectionDeliveryState::new(id, Arc::clone(&transport));
//!
//! state.enqueue("A").unwrap();
//! state.enqueue("B").unwrap();
//! trigger(&state).unwrap();
//!
//! assert_eq!(transport.delivered(id), vec!["A", "B"]);
//! assert!(!state.is_draining());
//! ```

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // delivery::DeliveryRegistry is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc       // Panic docs can be verbose
)]

pub mod config;
pub mod delivery;
pub mod error;
pub mod memory;
pub mod observability;
pub mod soak;
pub mod transport;

use std::fmt;
use uuid::Uuid;

pub use delivery::{
    trigger, AsyncDeliverer, ConnectionDeliveryState, DeliveryRegistry, TriggerOutcome,
};
pub use error::{DeliveryError, Result};
pub use transport::{Transport, TransportError};

/// Identifier of one logical duplex connection to a remote peer.
///
/// Backed by a UUIDv7 so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh, time-sortable connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
