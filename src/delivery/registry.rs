//! Connection registry keyed by connection id.
//!
//! Creates delivery state when a connection is established, routes
//! `enqueue`/`trigger` calls by id, and tears state down on close.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task::JoinHandle;

use crate::delivery::dispatch::AsyncDeliverer;
use crate::delivery::state::ConnectionDeliveryState;
use crate::delivery::trigger::{trigger, TriggerOutcome};
use crate::error::{DeliveryError, Result};
use crate::transport::Transport;
use crate::ConnectionId;

/// Registry of open connections sharing one transport.
///
/// The map lock is held only to look up or insert an entry, never across
/// an enqueue, a drain or a transport write.
pub struct DeliveryRegistry<T: Transport + Clone> {
    transport: T,
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionDeliveryState<T>>>>,
}

impl<T: Transport + Clone> DeliveryRegistry<T> {
    /// Create an empty registry writing through `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection under a fresh id.
    pub fn open(&self) -> ConnectionId {
        let id = ConnectionId::new();
        self.open_with(id);
        id
    }

    /// Register a connection under a caller-chosen id.
    ///
    /// If the id is already registered, the prior state is closed and its
    /// pending messages discarded (takeover).
    pub fn open_with(&self, id: ConnectionId) -> Arc<ConnectionDeliveryState<T>> {
        let state = Arc::new(ConnectionDeliveryState::new(id, self.transport.clone()));
        let prior = self.write_connections().insert(id, Arc::clone(&state));

        if let Some(prior) = prior {
            tracing::info!(connection = %id, "Replacing prior delivery state (takeover)");
            prior.close();
        } else {
            tracing::info!(connection = %id, "Connection delivery state opened");
        }
        state
    }

    /// Look up the delivery state for a connection.
    pub fn get(&self, id: ConnectionId) -> Result<Arc<ConnectionDeliveryState<T>>> {
        self.read_connections()
            .get(&id)
            .cloned()
            .ok_or(DeliveryError::ClosedConnection(id))
    }

    /// Append a message to a connection's outbound queue.
    pub fn enqueue(&self, id: ConnectionId, message: T::Message) -> Result<()> {
        self.get(id)?.enqueue(message)
    }

    /// Trigger delivery for a connection on the calling thread.
    pub fn trigger(&self, id: ConnectionId) -> Result<TriggerOutcome> {
        let state = self.get(id)?;
        trigger(&state)
    }

    /// Trigger delivery for a connection through an async deliverer.
    pub fn deliver(
        &self,
        id: ConnectionId,
        deliverer: &AsyncDeliverer,
    ) -> Result<Option<JoinHandle<()>>>
    where
        T: 'static,
        T::Message: 'static,
    {
        let state = self.get(id)?;
        Ok(deliverer.deliver(state))
    }

    /// Close a connection, discarding anything still queued.
    ///
    /// Returns the number of discarded messages.
    pub fn close(&self, id: ConnectionId) -> Result<usize> {
        let state = self
            .write_connections()
            .remove(&id)
            .ok_or(DeliveryError::ClosedConnection(id))?;
        Ok(state.close())
    }

    /// Ids of all open connections.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.read_connections().keys().copied().collect()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.read_connections().len()
    }

    /// Whether no connections are open.
    pub fn is_empty(&self) -> bool {
        self.read_connections().is_empty()
    }

    fn read_connections(
        &self,
    ) -> RwLockReadGuard<'_, HashMap<ConnectionId, Arc<ConnectionDeliveryState<T>>>> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_connections(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<ConnectionDeliveryState<T>>>> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }
}
