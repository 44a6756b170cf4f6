//! In-memory recording transport.
//!
//! Records every written message per connection and supports fault
//! injection:
//! - Artificial write latency
//! - Failing every Nth write, or writes matching a predicate
//! - Treating a connection as closed after its first failed write
//!
//! It also counts overlapping writes on the same connection, which must
//! stay at zero if drain ownership is exclusive.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::transport::{Transport, TransportError};
use crate::ConnectionId;

type FailPredicate<M> = Box<dyn Fn(&M) -> bool + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport that keeps written messages in memory.
pub struct MemoryTransport<M> {
    delivered: Mutex<HashMap<ConnectionId, Vec<M>>>,
    closed: Mutex<HashSet<ConnectionId>>,
    in_flight: Mutex<HashSet<ConnectionId>>,
    failures: Mutex<Vec<(ConnectionId, String)>>,
    writes: AtomicU64,
    overlapping_writes: AtomicUsize,
    latency: Duration,
    fail_every: Option<u64>,
    fail_when: Option<FailPredicate<M>>,
    close_on_failure: bool,
}

impl<M> MemoryTransport<M> {
    /// Create a transport that accepts every write immediately.
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(HashMap::new()),
            closed: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashSet::new()),
            failures: Mutex::new(Vec::new()),
            writes: AtomicU64::new(0),
            overlapping_writes: AtomicUsize::new(0),
            latency: Duration::ZERO,
            fail_every: None,
            fail_when: None,
            close_on_failure: false,
        }
    }

    /// Sleep for `latency` inside every write.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every `n`th write across all connections. Zero disables.
    #[must_use]
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Fail writes of messages matching `predicate`.
    #[must_use]
    pub fn fail_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    /// Mark a connection closed when a write on it fails.
    #[must_use]
    pub fn close_on_failure(mut self) -> Self {
        self.close_on_failure = true;
        self
    }

    /// Mark a connection as closed by the peer.
    pub fn close(&self, connection: ConnectionId) {
        lock(&self.closed).insert(connection);
    }

    /// Number of messages written to a connection.
    pub fn delivered_count(&self, connection: ConnectionId) -> usize {
        lock(&self.delivered).get(&connection).map_or(0, Vec::len)
    }

    /// Number of messages written across all connections.
    pub fn total_delivered(&self) -> usize {
        lock(&self.delivered).values().map(Vec::len).sum()
    }

    /// Write attempts seen, including failed ones.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Failures reported through `write_failed`, in order.
    pub fn failures(&self) -> Vec<(ConnectionId, String)> {
        lock(&self.failures).clone()
    }

    /// Writes that started while another write on the same connection was
    /// still in progress.
    pub fn overlapping_writes(&self) -> usize {
        self.overlapping_writes.load(Ordering::SeqCst)
    }

    fn should_fail(&self, attempt: u64, message: &M) -> bool {
        self.fail_every.is_some_and(|n| attempt % n == 0)
            || self.fail_when.as_ref().is_some_and(|predicate| predicate(message))
    }
}

impl<M: Clone> MemoryTransport<M> {
    /// Messages written to a connection, in write order.
    pub fn delivered(&self, connection: ConnectionId) -> Vec<M> {
        lock(&self.delivered)
            .get(&connection)
            .cloned()
            .unwrap_or_default()
    }
}

impl<M> Default for MemoryTransport<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for MemoryTransport<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("writes", &self.write_count())
            .field("latency", &self.latency)
            .field("fail_every", &self.fail_every)
            .field("close_on_failure", &self.close_on_failure)
            .finish_non_exhaustive()
    }
}

/// Marks a connection as having a write in progress.
struct WriteSlot<'a> {
    in_flight: &'a Mutex<HashSet<ConnectionId>>,
    connection: ConnectionId,
    entered: bool,
}

impl<'a> WriteSlot<'a> {
    fn enter(in_flight: &'a Mutex<HashSet<ConnectionId>>, connection: ConnectionId) -> Self {
        let entered = lock(in_flight).insert(connection);
        Self {
            in_flight,
            connection,
            entered,
        }
    }
}

impl Drop for WriteSlot<'_> {
    fn drop(&mut self) {
        if self.entered {
            lock(self.in_flight).remove(&self.connection);
        }
    }
}

impl<M: Send> Transport for MemoryTransport<M> {
    type Message = M;

    fn write(&self, connection: ConnectionId, message: M) -> Result<(), TransportError> {
        if self.is_closed(connection) {
            return Err(TransportError::Closed);
        }

        let slot = WriteSlot::enter(&self.in_flight, connection);
        if !slot.entered {
            self.overlapping_writes.fetch_add(1, Ordering::SeqCst);
        }

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        let attempt = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.should_fail(attempt, &message) {
            return Err(TransportError::Rejected(format!("injected failure on write {attempt}")));
        }

        lock(&self.delivered).entry(connection).or_default().push(message);
        Ok(())
    }

    fn is_closed(&self, connection: ConnectionId) -> bool {
        lock(&self.closed).contains(&connection)
    }

    fn write_failed(&self, connection: ConnectionId, error: &TransportError) {
        lock(&self.failures).push((connection, error.to_string()));
        if self.close_on_failure {
            self.close(connection);
        }
    }
}
