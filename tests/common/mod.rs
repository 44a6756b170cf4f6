//! Test utilities for outflow integration tests.
//!
//! Provides:
//! - Connection state fixtures over a recording transport
//! - A gated transport that parks a drain mid-write
//! - Polling helpers

#![allow(dead_code)]

use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use outflow::delivery::ConnectionDeliveryState;
use outflow::memory::MemoryTransport;
use outflow::{ConnectionId, Transport, TransportError};

/// Delivery state over a shared recording transport.
pub type MemoryState<M> = ConnectionDeliveryState<Arc<MemoryTransport<M>>>;

/// Create delivery state for a fresh connection over `transport`.
pub fn new_state<M: Send>(transport: MemoryTransport<M>) -> (Arc<MemoryTransport<M>>, Arc<MemoryState<M>>) {
    let transport = Arc::new(transport);
    let state = Arc::new(ConnectionDeliveryState::new(
        ConnectionId::new(),
        Arc::clone(&transport),
    ));
    (transport, state)
}

/// Transport that parks the drain while writing one chosen message.
///
/// When the gated message is written, the drain thread meets the test
/// thread at `reached`, then waits at `resume` until the test has finished
/// whatever it wanted to do while the drain holds the token. A failing gate
/// then rejects the gated message instead of recording it.
pub struct GatedTransport {
    gate: &'static str,
    fail_gate: bool,
    pub reached: Barrier,
    pub resume: Barrier,
    delivered: Mutex<Vec<&'static str>>,
}

impl GatedTransport {
    pub fn new(gate: &'static str) -> Self {
        Self {
            gate,
            fail_gate: false,
            reached: Barrier::new(2),
            resume: Barrier::new(2),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Reject the gated message once the test resumes the drain.
    pub fn failing(mut self) -> Self {
        self.fail_gate = true;
        self
    }

    pub fn delivered(&self) -> Vec<&'static str> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Transport for GatedTransport {
    type Message = &'static str;

    fn write(&self, _connection: ConnectionId, message: &'static str) -> Result<(), TransportError> {
        if message == self.gate {
            self.reached.wait();
            self.resume.wait();
            if self.fail_gate {
                return Err(TransportError::Rejected(format!("gated write of {message}")));
            }
        }
        self.delivered.lock().unwrap().push(message);
        Ok(())
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Assert that each producer's messages appear in increasing order.
pub fn assert_fifo_per_producer(delivered: &[(usize, u64)]) {
    let mut last: std::collections::HashMap<usize, u64> = std::collections::HashMap::new();
    for &(producer, seq) in delivered {
        if let Some(prev) = last.insert(producer, seq) {
            assert!(
                seq > prev,
                "producer {producer} delivered seq {seq} after {prev}"
            );
        }
    }
}
