//! Multi-producer soak run.
//!
//! Opens connections over a [`MemoryTransport`], lets many producers
//! enqueue and trigger concurrently, waits for the queues to settle and
//! then checks that every message arrived exactly once and in order.
//!
//! An injected write failure closes its connection, so with failures enabled
//! producers keep going and count the enqueues that connection refuses.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::config::Config;
use crate::delivery::{AsyncDeliverer, ConnectionDeliveryState, DeliveryRegistry};
use crate::memory::MemoryTransport;
use crate::ConnectionId;

/// How often the settle loop polls for completion.
const SETTLE_INTERVAL: Duration = Duration::from_millis(10);

/// Producers yield to the runtime after this many enqueues.
const YIELD_EVERY: u64 = 64;

/// A soak message: which producer sent it and its per-producer sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoakMessage {
    pub producer: usize,
    pub seq: u64,
}

type SoakTransport = Arc<MemoryTransport<SoakMessage>>;

/// Outcome of a soak run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SoakReport {
    pub connections: usize,
    pub producers: usize,
    pub messages_per_producer: u64,
    /// Messages enqueued by producers.
    pub enqueued: u64,
    /// Enqueues refused because a failure had already closed the connection.
    pub rejected: u64,
    /// Messages written to the transport.
    pub delivered: u64,
    /// Messages consumed by an injected transport failure.
    pub failed: u64,
    /// Messages dropped from a queue when its connection closed.
    pub discarded: u64,
    /// Enqueued messages that were neither delivered, failed nor discarded.
    pub lost: u64,
    pub duplicated: u64,
    pub reordered: u64,
    /// Writes that overlapped on one connection.
    pub overlapping_writes: u64,
    pub elapsed_ms: u64,
    pub timed_out: bool,
    pub interrupted: bool,
}

impl SoakReport {
    /// True if every message was accounted for, once, in order.
    pub fn is_clean(&self) -> bool {
        self.lost == 0
            && self.duplicated == 0
            && self.reordered == 0
            && self.overlapping_writes == 0
            && !self.timed_out
    }
}

/// Run a soak test.
///
/// # Arguments
///
/// * `config` - Soak configuration
/// * `shutdown_rx` - Receiver for shutdown signal; stops producers early
pub async fn run_soak(
    config: Config,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<SoakReport> {
    anyhow::ensure!(config.connections > 0, "at least one connection is required");

    let transport: SoakTransport = Arc::new(
        MemoryTransport::new()
            .with_latency(config.write_latency())
            .fail_every(config.fail_every),
    );
    let registry = Arc::new(DeliveryRegistry::new(Arc::clone(&transport)));
    let connections: Arc<Vec<ConnectionId>> =
        Arc::new((0..config.connections).map(|_| registry.open()).collect());
    let states = connections
        .iter()
        .map(|id| registry.get(*id))
        .collect::<Result<Vec<_>, _>>()?;
    let deliverer = AsyncDeliverer::current();

    tracing::info!(
        connections = config.connections,
        producers = config.producers,
        messages = config.messages,
        "Starting soak run"
    );
    let start = Instant::now();

    let producers: Vec<_> = (0..config.producers)
        .map(|producer| {
            let registry = Arc::clone(&registry);
            let connections = Arc::clone(&connections);
            let deliverer = deliverer.clone();
            let shutdown_rx = shutdown_rx.clone();
            let messages = config.messages;
            tokio::spawn(async move {
                let mut enqueued = 0u64;
                let mut rejected = 0u64;
                let mut next = producer % connections.len();
                for seq in 0..messages {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    let id = connections[next];
                    next = (next + 1) % connections.len();
                    match registry.enqueue(id, SoakMessage { producer, seq }) {
                        Ok(()) => {
                            registry.deliver(id, &deliverer)?;
                            enqueued += 1;
                        }
                        Err(e) if e.is_closed() => rejected += 1,
                        Err(e) => return Err(e),
                    }
                    if seq % YIELD_EVERY == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                Ok::<_, crate::DeliveryError>((enqueued, rejected))
            })
        })
        .collect();

    let mut enqueued = 0;
    let mut rejected = 0;
    for result in futures::future::join_all(producers).await {
        let (accepted, refused) = result??;
        enqueued += accepted;
        rejected += refused;
    }

    // Every enqueue was paired with a trigger and a failed drain closes its
    // connection, so every message ends up delivered, failed or discarded
    // without further help. Anything else shows up as a timeout.
    let deadline = start + config.timeout();
    let mut timed_out = false;
    let mut interrupted = *shutdown_rx.borrow();
    while !interrupted {
        let settled = count(transport.total_delivered())
            + count(transport.failures().len())
            + total_discarded(&states);
        if settled >= enqueued {
            break;
        }
        if Instant::now() >= deadline {
            timed_out = true;
            tracing::warn!("Soak run timed out before all messages were delivered");
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(SETTLE_INTERVAL) => {}
            _ = shutdown_rx.changed() => {
                interrupted = true;
                tracing::info!("Shutdown requested, ending soak run early");
            }
        }
    }

    for id in connections.iter() {
        registry.close(*id)?;
    }
    let discarded = total_discarded(&states);

    let mut report = verify(&transport, &connections);
    report.connections = config.connections;
    report.producers = config.producers;
    report.messages_per_producer = config.messages;
    report.enqueued = enqueued;
    report.rejected = rejected;
    report.discarded = discarded;
    report.lost = enqueued.saturating_sub(report.delivered + report.failed + discarded);
    report.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    report.timed_out = timed_out;
    report.interrupted = interrupted;

    tracing::info!(
        enqueued = report.enqueued,
        delivered = report.delivered,
        failed = report.failed,
        rejected = report.rejected,
        discarded = report.discarded,
        lost = report.lost,
        elapsed_ms = report.elapsed_ms,
        "Soak run complete"
    );
    Ok(report)
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn total_discarded(states: &[Arc<ConnectionDeliveryState<SoakTransport>>]) -> u64 {
    states.iter().map(|state| count(state.discarded())).sum()
}

/// Check exactly-once and per-producer FIFO delivery on every connection.
fn verify(transport: &MemoryTransport<SoakMessage>, connections: &[ConnectionId]) -> SoakReport {
    let mut report = SoakReport {
        failed: count(transport.failures().len()),
        overlapping_writes: count(transport.overlapping_writes()),
        ..SoakReport::default()
    };
    let mut seen = HashSet::new();

    for id in connections {
        let mut last_seq: HashMap<usize, u64> = HashMap::new();
        for message in transport.delivered(*id) {
            report.delivered += 1;
            if !seen.insert(message) {
                report.duplicated += 1;
            }
            // Failures leave gaps, never inversions
            if let Some(prev) = last_seq.insert(message.producer, message.seq) {
                if message.seq <= prev {
                    report.reordered += 1;
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_soak_run_is_clean() {
        let (_tx, rx) = watch::channel(false);
        let report = run_soak(Config::test_config(), rx).await.unwrap();

        assert!(report.is_clean(), "unclean report: {report:?}");
        assert_eq!(report.enqueued, 800);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.delivered, 800);
        assert_eq!(report.discarded, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_soak_run_with_failures_accounts_for_every_message() {
        let (_tx, rx) = watch::channel(false);
        let config = Config {
            fail_every: 37,
            ..Config::test_config()
        };
        let report = run_soak(config, rx).await.unwrap();

        assert!(report.is_clean(), "unclean report: {report:?}");
        assert!(report.failed > 0);
        assert_eq!(report.enqueued + report.rejected, 800);
        assert_eq!(report.delivered + report.failed + report.discarded, report.enqueued);
    }

    #[test]
    fn test_verify_detects_reordering_and_duplicates() {
        let transport = MemoryTransport::new();
        let id = ConnectionId::new();
        for seq in [0, 2, 1, 2] {
            crate::Transport::write(&transport, id, SoakMessage { producer: 0, seq }).unwrap();
        }

        let report = verify(&transport, &[id]);

        assert_eq!(report.delivered, 4);
        assert_eq!(report.duplicated, 1);
        assert_eq!(report.reordered, 1);
    }

    #[test]
    fn test_report_is_serializable() {
        let report = SoakReport::default();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"lost\":0"));
    }
}
