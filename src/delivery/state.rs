//! Per-connection delivery state.
//!
//! Holds the outbound queue and the drain ownership token:
//! - Producers push to the back of the queue from any thread
//! - Only the thread holding the token pops from the front
//! - The token is an `AtomicU64` taken with a compare-and-swap, so
//!   acquiring it never blocks

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{DeliveryError, Result};
use crate::observability::metrics;
use crate::transport::Transport;
use crate::ConnectionId;

/// Token value meaning no thread is draining.
const FREE: u64 = 0;

/// Source of per-thread owner tags. Zero is reserved for [`FREE`].
static NEXT_OWNER_TAG: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static OWNER_TAG: u64 = NEXT_OWNER_TAG.fetch_add(1, Ordering::Relaxed);
}

/// Tag identifying the calling thread as a token holder.
fn owner_tag() -> u64 {
    OWNER_TAG.with(|tag| *tag)
}

/// Outbound queue and drain ownership for one connection.
///
/// All counters and the token use `SeqCst`. The recheck protocol depends on
/// a producer's "push then try to acquire" and an owner's "release then look
/// at the queue" being totally ordered with respect to each other.
pub struct ConnectionDeliveryState<T: Transport> {
    id: ConnectionId,
    transport: T,
    queue: Mutex<VecDeque<T::Message>>,
    /// Mirror of the queue length, readable without taking the queue lock.
    pending: AtomicUsize,
    /// `FREE`, or the owner tag of the thread currently draining.
    token: AtomicU64,
    closed: AtomicBool,
    /// Messages dropped by `close` without being written.
    discarded: AtomicUsize,
}

impl<T: Transport> ConnectionDeliveryState<T> {
    /// Create delivery state for a newly established connection.
    pub fn new(id: ConnectionId, transport: T) -> Self {
        Self {
            id,
            transport,
            queue: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            token: AtomicU64::new(FREE),
            closed: AtomicBool::new(false),
            discarded: AtomicUsize::new(0),
        }
    }

    /// The connection this state belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The transport messages are written to.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Append a message to the back of the outbound queue.
    ///
    /// Never waits on a drain: the queue lock only covers the push itself,
    /// never a transport write.
    pub fn enqueue(&self, message: T::Message) -> Result<()> {
        let mut queue = self.lock_queue();
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeliveryError::ClosedConnection(self.id));
        }
        queue.push_back(message);
        self.pending.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Try to take the drain token.
    ///
    /// Returns true iff this call moved the token from free to held.
    /// A single compare-and-swap, so it is wait-free.
    pub fn try_acquire(&self) -> bool {
        self.token
            .compare_exchange(FREE, owner_tag(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Give the drain token back.
    ///
    /// Only the thread that last acquired the token may release it. Anything
    /// else is a logic error: it panics in debug builds, and in release builds
    /// it leaves the token untouched and returns `OwnershipViolation`.
    pub fn release(&self) -> Result<()> {
        match self
            .token
            .compare_exchange(owner_tag(), FREE, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(()),
            Err(holder) => Err(self.ownership_violation("release", holder)),
        }
    }

    /// Pop and write queued messages until the queue is empty or a write fails.
    ///
    /// Returns the number of messages written. Must be called while holding
    /// the token. Stops early without writing if the connection has been
    /// closed, either here or by the transport.
    pub fn drain_once(&self) -> Result<usize> {
        let holder = self.token.load(Ordering::SeqCst);
        if holder != owner_tag() {
            return Err(self.ownership_violation("drain", holder));
        }

        let mut written = 0;
        loop {
            if self.transport.is_closed(self.id) {
                tracing::debug!(connection = %self.id, "Transport reports connection closed, stopping drain");
                self.close();
                break;
            }

            // The lock is dropped before the write so producers never wait on I/O
            let Some(message) = self.pop_front() else {
                break;
            };

            match self.transport.write(self.id, message) {
                Ok(()) => {
                    written += 1;
                    tracing::trace!(connection = %self.id, written, "Message written");
                }
                Err(source) => {
                    return Err(DeliveryError::TransportWrite {
                        connection: self.id,
                        written,
                        source,
                    });
                }
            }
        }

        Ok(written)
    }

    /// Whether the outbound queue looks empty.
    ///
    /// A heuristic for the recheck step only; it can be stale as soon as
    /// it returns.
    pub fn is_empty(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    /// Number of messages waiting in the outbound queue.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether some thread currently holds the drain token.
    pub fn is_draining(&self) -> bool {
        self.token.load(Ordering::SeqCst) != FREE
    }

    /// Whether the calling thread holds the drain token.
    pub fn holds_token(&self) -> bool {
        self.token.load(Ordering::SeqCst) == owner_tag()
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear down the delivery state.
    ///
    /// Closing is terminal: later enqueues fail with `ClosedConnection` and
    /// anything still queued is discarded. Returns how many messages were
    /// discarded; a second close returns 0.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut queue = self.lock_queue();
            if self.closed.swap(true, Ordering::SeqCst) {
                return 0;
            }
            let discarded = queue.len();
            queue.clear();
            self.pending.fetch_sub(discarded, Ordering::SeqCst);
            self.discarded.store(discarded, Ordering::SeqCst);
            discarded
        };

        metrics::record_discarded(discarded as u64);
        tracing::info!(connection = %self.id, discarded, "Connection delivery state closed");
        discarded
    }

    /// Messages that were queued when the connection closed.
    pub fn discarded(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }

    fn pop_front(&self) -> Option<T::Message> {
        let mut queue = self.lock_queue();
        let message = queue.pop_front()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(message)
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<T::Message>> {
        // A panicking writer never leaves the deque half-modified
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ownership_violation(&self, operation: &'static str, holder: u64) -> DeliveryError {
        metrics::record_ownership_violation();
        tracing::warn!(
            connection = %self.id,
            operation,
            holder,
            caller = owner_tag(),
            "Drain token used by a thread that does not hold it"
        );
        if cfg!(debug_assertions) {
            panic!(
                "ownership violation: {operation} on connection {} by a thread that does not hold the drain token",
                self.id
            );
        }
        DeliveryError::OwnershipViolation(self.id)
    }
}

impl<T: Transport> fmt::Debug for ConnectionDeliveryState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDeliveryState")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .field("draining", &self.is_draining())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
