//! Asynchronous dispatch of delivery triggers.
//!
//! Runs the trigger on tokio's blocking pool so the thread asking for
//! delivery is never charged for transport I/O.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::delivery::state::ConnectionDeliveryState;
use crate::delivery::trigger::{trigger, TriggerOutcome};
use crate::observability::metrics;
use crate::transport::Transport;

/// Submits delivery triggers to a tokio runtime.
#[derive(Debug, Clone)]
pub struct AsyncDeliverer {
    handle: Handle,
}

impl AsyncDeliverer {
    /// Create a deliverer that spawns onto the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a deliverer bound to the runtime of the calling context.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Request delivery of the connection's queued messages without blocking.
    ///
    /// Returns `None` if nothing was spawned: either the connection is
    /// closed, or a drain already holds the token. The latter is safe because
    /// the holder has not yet released, so its recheck will see anything
    /// enqueued before this call. Otherwise returns the handle of the spawned
    /// drain, which callers are free to ignore.
    pub fn deliver<T>(&self, state: Arc<ConnectionDeliveryState<T>>) -> Option<JoinHandle<()>>
    where
        T: Transport + 'static,
        T::Message: 'static,
    {
        if state.is_closed() {
            return None;
        }
        if state.is_draining() {
            metrics::record_trigger_deferred();
            return None;
        }

        Some(self.handle.spawn_blocking(move || match trigger(&state) {
            Ok(TriggerOutcome::Deferred) => {}
            Ok(outcome) => {
                tracing::trace!(connection = %state.id(), ?outcome, "Asynchronous delivery finished");
            }
            Err(e) if e.is_closed() => {
                tracing::debug!(connection = %state.id(), "Connection closed before delivery");
            }
            Err(e) => {
                tracing::warn!(connection = %state.id(), error = %e, "Asynchronous delivery failed");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::ConnectionId;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_deliver_drains_off_thread() {
        let transport = Arc::new(MemoryTransport::new());
        let state = Arc::new(ConnectionDeliveryState::new(ConnectionId::new(), Arc::clone(&transport)));
        state.enqueue(1u32).unwrap();
        state.enqueue(2).unwrap();

        let deliverer = AsyncDeliverer::current();
        let handle = deliverer.deliver(Arc::clone(&state)).expect("drain should be spawned");
        handle.await.unwrap();

        assert_eq!(transport.delivered(state.id()), vec![1, 2]);
        assert!(!state.is_draining());
    }

    #[tokio::test]
    async fn test_deliver_skips_when_draining() {
        let transport = Arc::new(MemoryTransport::<u32>::new());
        let state = Arc::new(ConnectionDeliveryState::new(ConnectionId::new(), transport));
        assert!(state.try_acquire());

        let deliverer = AsyncDeliverer::current();
        assert!(deliverer.deliver(Arc::clone(&state)).is_none());

        state.release().unwrap();
    }

    #[tokio::test]
    async fn test_deliver_skips_closed_connection() {
        let transport = Arc::new(MemoryTransport::<u32>::new());
        let state = Arc::new(ConnectionDeliveryState::new(ConnectionId::new(), transport));
        state.close();

        assert!(AsyncDeliverer::current().deliver(state).is_none());
    }
}
