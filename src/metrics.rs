//! Process-wide transmission counters.
//! Read by the CLI after a batch; not exported anywhere else yet.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Instant;

static TX_SENT: AtomicU64 = AtomicU64::new(0);
static TX_ACKED: AtomicU64 = AtomicU64::new(0);
static TX_NACKED: AtomicU64 = AtomicU64::new(0);
static TX_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static TX_FAULTS: AtomicU64 = AtomicU64::new(0);
static BATCHES_SUCCEEDED: AtomicU64 = AtomicU64::new(0);
static BATCHES_FAILED: AtomicU64 = AtomicU64::new(0);
static RX_PACKETS: AtomicU64 = AtomicU64::new(0);
static RX_REJECTED: AtomicU64 = AtomicU64::new(0);
static ACK_LATENCY_SUM_MS: AtomicU64 = AtomicU64::new(0);
static ACK_LATENCY_COUNT: AtomicU64 = AtomicU64::new(0);

static NODE_COUNTERS: OnceLock<Mutex<HashMap<String, NodeCounter>>> = OnceLock::new();

pub fn inc_tx_sent() {
    TX_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_tx_acked() {
    TX_ACKED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_tx_nacked() {
    TX_NACKED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_tx_timeouts() {
    TX_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_tx_faults() {
    TX_FAULTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_batch(succeeded: bool) {
    if succeeded {
        BATCHES_SUCCEEDED.fetch_add(1, Ordering::Relaxed);
    } else {
        BATCHES_FAILED.fetch_add(1, Ordering::Relaxed);
    }
}
pub fn inc_rx_packets() {
    RX_PACKETS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_rx_rejected() {
    RX_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn observe_ack_latency(sent_at: Instant) {
    let ms = sent_at.elapsed().as_millis() as u64;
    ACK_LATENCY_SUM_MS.fetch_add(ms, Ordering::Relaxed);
    ACK_LATENCY_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Per remote node delivery tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeCounter {
    pub sent: u64,
    pub acked: u64,
    pub failed: u64,
    pub consecutive_failures: u64,
}

fn node_counter_lock() -> MutexGuard<'static, HashMap<String, NodeCounter>> {
    // Counters stay usable after a panic elsewhere; a torn tally is acceptable
    NODE_COUNTERS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Record the outcome of one transmission to `address`.
pub fn record_node_outcome(address: &str, delivered: bool) -> NodeCounter {
    let mut guard = node_counter_lock();
    let counter = guard.entry(address.to_string()).or_default();
    counter.sent = counter.sent.saturating_add(1);
    if delivered {
        counter.acked = counter.acked.saturating_add(1);
        counter.consecutive_failures = 0;
    } else {
        counter.failed = counter.failed.saturating_add(1);
        counter.consecutive_failures = counter.consecutive_failures.saturating_add(1);
    }
    *counter
}

pub fn node_counters_snapshot() -> HashMap<String, NodeCounter> {
    node_counter_lock().clone()
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub tx_sent: u64,
    pub tx_acked: u64,
    pub tx_nacked: u64,
    pub tx_timeouts: u64,
    pub tx_faults: u64,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub rx_packets: u64,
    pub rx_rejected: u64,
    pub ack_latency_avg_ms: Option<u64>,
}

pub fn snapshot() -> Snapshot {
    let sum = ACK_LATENCY_SUM_MS.load(Ordering::Relaxed);
    let count = ACK_LATENCY_COUNT.load(Ordering::Relaxed);
    Snapshot {
        tx_sent: TX_SENT.load(Ordering::Relaxed),
        tx_acked: TX_ACKED.load(Ordering::Relaxed),
        tx_nacked: TX_NACKED.load(Ordering::Relaxed),
        tx_timeouts: TX_TIMEOUTS.load(Ordering::Relaxed),
        tx_faults: TX_FAULTS.load(Ordering::Relaxed),
        batches_succeeded: BATCHES_SUCCEEDED.load(Ordering::Relaxed),
        batches_failed: BATCHES_FAILED.load(Ordering::Relaxed),
        rx_packets: RX_PACKETS.load(Ordering::Relaxed),
        rx_rejected: RX_REJECTED.load(Ordering::Relaxed),
        ack_latency_avg_ms: if count > 0 { Some(sum / count) } else { None },
    }
}
