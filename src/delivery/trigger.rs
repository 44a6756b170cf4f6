//! Single-flight delivery trigger.
//!
//! `trigger` may be called any number of times, from any number of threads,
//! for the same connection. It tries to take the drain token without
//! blocking; whoever holds the token owns every message visible in the
//! queue from the moment of acquisition.
//!
//! A bare "try-lock, drain, unlock" loses wakeups: a message pushed after
//! the owner's last pop, whose trigger loses the race against the owner's
//! unlock, sits in the queue until some unrelated trigger arrives. Here the
//! owner looks at the queue again *after* releasing, and takes the token back
//! if work appeared. Either that reacquire succeeds, or another trigger got
//! the token and now owns the message.

use crate::delivery::state::ConnectionDeliveryState;
use crate::error::{DeliveryError, Result};
use crate::observability::metrics;
use crate::transport::Transport;

/// What a single `trigger` call ended up doing.
///
/// Informational only. Delivery guarantees do not depend on callers
/// inspecting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Another thread held the drain token; it is responsible for the queue.
    Deferred,
    /// Drained until the queue was seen empty after a release.
    Drained {
        /// Messages written across all cycles.
        delivered: usize,
        /// Acquire, drain, release cycles run. More than one means the
        /// recheck found late work and reacquired.
        cycles: usize,
    },
    /// The recheck found work but another thread won the reacquire.
    Handoff {
        /// Messages written across all cycles.
        delivered: usize,
        /// Acquire, drain, release cycles run.
        cycles: usize,
    },
}

impl TriggerOutcome {
    /// Messages written by this call.
    pub fn delivered(&self) -> usize {
        match self {
            Self::Deferred => 0,
            Self::Drained { delivered, .. } | Self::Handoff { delivered, .. } => *delivered,
        }
    }
}

/// Releases the drain token if the drain unwinds.
struct OwnershipGuard<'a, T: Transport> {
    state: &'a ConnectionDeliveryState<T>,
    armed: bool,
}

impl<'a, T: Transport> OwnershipGuard<'a, T> {
    fn new(state: &'a ConnectionDeliveryState<T>) -> Self {
        Self { state, armed: true }
    }

    fn release(mut self) -> Result<()> {
        self.armed = false;
        self.state.release()
    }
}

impl<T: Transport> Drop for OwnershipGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.state.release();
        }
    }
}

/// Ask for the connection's queued messages to be delivered.
///
/// Never blocks waiting for another thread. If a drain is already running
/// this returns `Deferred` straight away; otherwise the calling thread drains
/// inline, charging any transport I/O to itself. Use
/// [`AsyncDeliverer`](crate::delivery::AsyncDeliverer) to run the drain off
/// the calling thread.
///
/// A failed write ends delivery on the connection. The state is closed while
/// the token is still held, so the messages behind the failed one (including
/// any whose triggers deferred to this drain) are discarded rather than left
/// without an owner. The token is then released, the transport is told
/// through [`Transport::write_failed`], and the failure is returned.
pub fn trigger<T: Transport>(state: &ConnectionDeliveryState<T>) -> Result<TriggerOutcome> {
    if state.is_closed() {
        return Err(DeliveryError::ClosedConnection(state.id()));
    }

    if !state.try_acquire() {
        metrics::record_trigger_deferred();
        tracing::trace!(connection = %state.id(), "Drain already in progress, deferring");
        return Ok(TriggerOutcome::Deferred);
    }

    let mut delivered = 0;
    let mut cycles = 0;

    loop {
        cycles += 1;
        let guard = OwnershipGuard::new(state);
        let drained = state.drain_once();
        if matches!(drained, Err(DeliveryError::TransportWrite { .. })) {
            state.close();
        }
        #[cfg(test)]
        window::run_before_release();
        guard.release()?;
        #[cfg(test)]
        window::run_after_release();

        match drained {
            Ok(written) => {
                delivered += written;
                metrics::record_drain_cycle(written as u64);
                tracing::debug!(connection = %state.id(), written, cycle = cycles, "Drain cycle complete");
            }
            Err(DeliveryError::TransportWrite {
                connection,
                written,
                source,
            }) => {
                metrics::record_drain_cycle(written as u64);
                metrics::record_transport_failure();
                tracing::warn!(
                    connection = %connection,
                    written,
                    error = %source,
                    "Transport write failed, connection closed"
                );
                state.transport().write_failed(connection, &source);
                return Err(DeliveryError::TransportWrite {
                    connection,
                    written,
                    source,
                });
            }
            Err(other) => return Err(other),
        }

        // Recheck after release: a producer may have pushed after our last
        // pop and lost its acquire race against the release above.
        if state.is_empty() {
            return Ok(TriggerOutcome::Drained { delivered, cycles });
        }

        if !state.try_acquire() {
            tracing::debug!(
                connection = %state.id(),
                pending = state.pending(),
                "Late work picked up by another trigger"
            );
            return Ok(TriggerOutcome::Handoff { delivered, cycles });
        }

        metrics::record_recheck_reacquired();
        tracing::debug!(
            connection = %state.id(),
            pending = state.pending(),
            "Recheck found late work, reacquired drain token"
        );
    }
}
