//! Delivery scenario tests.
//!
//! Tests:
//! - In-order delivery of a batch with a single trigger
//! - A message enqueued while a drain is mid-write is still delivered
//! - Closing a connection discards pending messages and rejects new work
//! - A failed write is surfaced once and nothing behind it is retried
//! - A message deferred to a drain that then fails is discarded, not stranded
//! - Triggering an already drained connection is a no-op

mod common;

use std::sync::Arc;

use outflow::delivery::{trigger, ConnectionDeliveryState, DeliveryRegistry, TriggerOutcome};
use outflow::memory::MemoryTransport;
use outflow::{ConnectionId, DeliveryError};
use tokio_test::{assert_err, assert_ok};

use common::{new_state, GatedTransport};

#[test]
fn test_single_trigger_delivers_batch_in_order() {
    let (transport, state) = new_state(MemoryTransport::new());
    for message in ["A", "B", "C"] {
        assert_ok!(state.enqueue(message));
    }

    let outcome = assert_ok!(trigger(&state));

    assert_eq!(outcome.delivered(), 3);
    assert_eq!(transport.delivered(state.id()), vec!["A", "B", "C"]);
    assert!(!state.is_draining());
    assert!(state.is_empty());
}

#[test]
fn test_message_enqueued_mid_drain_is_delivered() {
    outflow::observability::tracing::init_test_tracing();
    let transport = Arc::new(GatedTransport::new("A"));
    let state = ConnectionDeliveryState::new(ConnectionId::new(), Arc::clone(&transport));
    state.enqueue("A").unwrap();

    std::thread::scope(|s| {
        let drainer = s.spawn(|| trigger(&state));

        // Thread 1 has taken A and is parked inside the write
        transport.reached.wait();

        state.enqueue("B").unwrap();
        let outcome = trigger(&state).unwrap();
        assert_eq!(outcome, TriggerOutcome::Deferred);

        transport.resume.wait();
        let outcome = drainer.join().unwrap().unwrap();
        assert_eq!(outcome.delivered(), 2);
    });

    assert_eq!(transport.delivered(), vec!["A", "B"]);
    assert!(!state.is_draining());
    assert!(state.is_empty());
}

#[test]
fn test_closed_connection_discards_pending() {
    let transport = Arc::new(MemoryTransport::new());
    let registry = DeliveryRegistry::new(Arc::clone(&transport));
    let id = registry.open();
    registry.enqueue(id, "X").unwrap();
    registry.enqueue(id, "Y").unwrap();

    assert_eq!(registry.close(id).unwrap(), 2);

    let err = assert_err!(registry.enqueue(id, "Z"));
    assert!(matches!(err, DeliveryError::ClosedConnection(closed) if closed == id));
    let err = assert_err!(registry.trigger(id));
    assert!(err.is_closed());
    assert!(transport.delivered(id).is_empty());
}

#[test]
fn test_closed_state_rejects_enqueue_and_trigger() {
    let (transport, state) = new_state(MemoryTransport::new());
    state.enqueue("X").unwrap();
    state.enqueue("Y").unwrap();

    assert_eq!(state.close(), 2);

    assert!(assert_err!(state.enqueue("Z")).is_closed());
    assert!(assert_err!(trigger(&state)).is_closed());
    assert_eq!(transport.write_count(), 0);
}

#[test]
fn test_write_failure_mid_drain() {
    let (transport, state) = new_state(
        MemoryTransport::new()
            .fail_when(|m: &&str| *m == "B")
            .close_on_failure(),
    );
    for message in ["A", "B", "C"] {
        state.enqueue(message).unwrap();
    }

    let err = assert_err!(trigger(&state));

    match err {
        DeliveryError::TransportWrite { connection, written, .. } => {
            assert_eq!(connection, state.id());
            assert_eq!(written, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!state.is_draining(), "token must be released after a failed write");
    assert_eq!(transport.failures().len(), 1);
    assert_eq!(transport.delivered(state.id()), vec!["A"]);

    // The failure closed the state; C is discarded instead of retried
    assert!(state.is_closed());
    assert_eq!(state.pending(), 0);
    assert_eq!(state.discarded(), 1);
    assert!(assert_err!(trigger(&state)).is_closed());
    assert!(state.enqueue("D").unwrap_err().is_closed());
    assert_eq!(transport.delivered(state.id()), vec!["A"]);
    assert_eq!(transport.failures().len(), 1);
}

#[test]
fn test_message_deferred_to_failing_drain_is_not_stranded() {
    let transport = Arc::new(GatedTransport::new("B").failing());
    let state = ConnectionDeliveryState::new(ConnectionId::new(), Arc::clone(&transport));
    state.enqueue("A").unwrap();
    state.enqueue("B").unwrap();

    std::thread::scope(|s| {
        let drainer = s.spawn(|| trigger(&state));

        // Thread 1 is parked inside the write of B, which is about to fail
        transport.reached.wait();

        state.enqueue("D").unwrap();
        assert_eq!(trigger(&state).unwrap(), TriggerOutcome::Deferred);

        transport.resume.wait();
        let err = drainer.join().unwrap().unwrap_err();
        assert!(matches!(err, DeliveryError::TransportWrite { written: 1, .. }));
    });

    // D had no drain left to deliver it; it must be discarded with the
    // connection rather than sit in an open queue.
    assert!(state.is_closed());
    assert!(!state.is_draining());
    assert_eq!(state.pending(), 0);
    assert_eq!(state.discarded(), 1);
    assert_eq!(transport.delivered(), vec!["A"]);
    assert!(assert_err!(state.enqueue("E")).is_closed());
}

#[test]
fn test_repeated_triggers_on_drained_connection_are_noops() {
    let (transport, state) = new_state(MemoryTransport::new());
    state.enqueue(1u32).unwrap();
    trigger(&state).unwrap();

    for _ in 0..10 {
        let outcome = assert_ok!(trigger(&state));
        assert_eq!(outcome, TriggerOutcome::Drained { delivered: 0, cycles: 1 });
    }

    assert_eq!(transport.write_count(), 1);
    assert!(!state.is_draining());
}

#[test]
fn test_connections_do_not_share_tokens() {
    let transport = Arc::new(MemoryTransport::new());
    let a = ConnectionDeliveryState::new(ConnectionId::new(), Arc::clone(&transport));
    let b = ConnectionDeliveryState::new(ConnectionId::new(), Arc::clone(&transport));
    a.enqueue(1u32).unwrap();
    b.enqueue(2).unwrap();

    assert!(a.try_acquire());
    // b is independent of a's token
    assert_eq!(trigger(&b).unwrap().delivered(), 1);
    a.release().unwrap();

    assert_eq!(transport.delivered(b.id()), vec![2]);
    assert_eq!(a.pending(), 1);
}
