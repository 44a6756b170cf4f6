//! Error taxonomy for the delivery core.
//!
//! - `ClosedConnection`: the connection's delivery state was torn down
//! - `OwnershipViolation`: a non-owner tried to release or drain
//! - `TransportWrite`: a drain hit a failed write and stopped

use thiserror::Error;

use crate::transport::TransportError;
use crate::ConnectionId;

/// Error type for delivery operations.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection {0} is closed")]
    ClosedConnection(ConnectionId),

    #[error("ownership violation on connection {0}: caller does not hold the drain token")]
    OwnershipViolation(ConnectionId),

    #[error("transport write failed on connection {connection} after {written} message(s): {source}")]
    TransportWrite {
        connection: ConnectionId,
        /// Messages successfully written in the failing drain before the error.
        written: usize,
        #[source]
        source: TransportError,
    },
}

impl DeliveryError {
    /// Connection the error refers to.
    pub fn connection(&self) -> ConnectionId {
        match self {
            Self::ClosedConnection(id) | Self::OwnershipViolation(id) => *id,
            Self::TransportWrite { connection, .. } => *connection,
        }
    }

    /// True for errors that are recovered by dropping the operation.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedConnection(_))
    }
}

/// Result alias for delivery operations.
pub type Result<T, E = DeliveryError> = std::result::Result<T, E>;
