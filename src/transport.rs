//! Outbound transport contract.
//!
//! The delivery core never touches sockets. It pops messages and hands
//! them to a [`Transport`], asks it whether a connection has been closed,
//! and tells it when a write failed so it can tear the connection down.

use thiserror::Error;

use crate::ConnectionId;

/// Error returned by a transport write.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Transport collaborator that physically writes messages to a peer.
///
/// Implementations are shared across connections and called from
/// whichever thread currently owns a connection's drain token. Calls for
/// one connection are never concurrent; calls for different connections
/// may be.
pub trait Transport: Send + Sync {
    /// Message type carried by this transport.
    type Message: Send;

    /// Write one message to the connection's peer. May block on I/O.
    fn write(&self, connection: ConnectionId, message: Self::Message) -> Result<(), TransportError>;

    /// Whether the transport already considers the connection closed.
    ///
    /// Checked before every write so an in-flight drain stops early.
    fn is_closed(&self, _connection: ConnectionId) -> bool {
        false
    }

    /// Notification that a write failed during a drain.
    ///
    /// Called exactly once per failed drain, after the delivery state has
    /// been closed and the drain token released. Retry and teardown of the
    /// underlying connection live here.
    fn write_failed(&self, _connection: ConnectionId, _error: &TransportError) {}
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    type Message = T::Message;

    fn write(&self, connection: ConnectionId, message: Self::Message) -> Result<(), TransportError> {
        (**self).write(connection, message)
    }

    fn is_closed(&self, connection: ConnectionId) -> bool {
        (**self).is_closed(connection)
    }

    fn write_failed(&self, connection: ConnectionId, error: &TransportError) {
        (**self).write_failed(connection, error);
    }
}
