//! Command fan-out with per-node acknowledgment.
//!
//! A batch sends a frame `[command id, status, payload...]` to each target
//! address in turn, waiting for the local radio's TX status before
//! moving on. Every outcome is published; the aggregate is returned and
//! published as `BatchSucceeded` / `BatchFailed`. A failing node never stops
//! the rest of the batch and nothing is retried.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::address::NodeAddress;
use super::command::{Command, STATUS_NORMAL};
use super::connection::ConnectionManager;
use super::errors::WirelessError;
use crate::events::{Event, EventBus, EventKind, EventSource};
use crate::logutil::hex_snippet;
use crate::metrics;

/// Per-address wait for the TX status.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(12);

#[derive(Debug)]
pub struct PacketTransceiver {
    connection: Arc<ConnectionManager>,
    bus: Arc<EventBus>,
    timeout_ms: AtomicU64,
}

/// Frame payload for `command`: `[id, STATUS_NORMAL] ++ payload`.
pub fn build_frame(command: Command, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.push(command.id());
    frame.push(STATUS_NORMAL);
    frame.extend_from_slice(payload);
    frame
}

/// Per-address outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub delivered: Vec<NodeAddress>,
    pub failed: Vec<NodeAddress>,
}

impl BatchReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

impl PacketTransceiver {
    pub fn new(connection: Arc<ConnectionManager>, bus: Arc<EventBus>) -> Self {
        Self {
            connection,
            bus,
            timeout_ms: AtomicU64::new(DEFAULT_TX_TIMEOUT.as_millis() as u64),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    /// Applies from the next address sent.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    fn tx_event(&self, kind: EventKind, command: Command, address: &NodeAddress) -> Event {
        Event::new(kind, EventSource::Transceiver)
            .with_command(command)
            .with_address(address.clone())
    }

    /// Send `command` with `payload` to each address in `targets`, in order.
    ///
    /// Returns `Ok(true)` only if every address acknowledged delivery.
    /// Addresses and payload length are validated up front; a bad one aborts
    /// the batch before any frame is written. Targets naming the same node
    /// are sent once, in order of first appearance.
    pub async fn send<S: AsRef<str>>(
        &self,
        command: Command,
        payload: &[u8],
        targets: &[S],
    ) -> Result<bool, WirelessError> {
        if targets.is_empty() {
            return Err(WirelessError::NoTargets);
        }
        if let Some(expected) = command.data_bytes() {
            if payload.len() != expected {
                return Err(WirelessError::PayloadLength {
                    command,
                    expected,
                    actual: payload.len(),
                });
            }
        }
        let mut addresses: Vec<NodeAddress> = Vec::with_capacity(targets.len());
        for target in targets {
            let address = NodeAddress::parse(target.as_ref())?;
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }
        Ok(self.send_to(command, payload, &addresses).await)
    }

    /// [`PacketTransceiver::send`] for already validated addresses. An empty
    /// slice yields an empty, successful batch.
    pub async fn send_to(&self, command: Command, payload: &[u8], addresses: &[NodeAddress]) -> bool {
        let items: Vec<(NodeAddress, Vec<u8>)> = addresses
            .iter()
            .map(|a| (a.clone(), payload.to_vec()))
            .collect();
        self.send_each(command, &items).await.all_delivered()
    }

    /// One batch in which every address gets its own payload.
    pub async fn send_each(
        &self,
        command: Command,
        items: &[(NodeAddress, Vec<u8>)],
    ) -> BatchReport {
        let total = items.len();
        let addresses = || items.iter().map(|(a, _)| a.clone());
        info!("Sending {} to {} node(s)", command, total);
        self.bus.emit(
            Event::new(EventKind::BatchStarted { total }, EventSource::Transceiver)
                .with_command(command)
                .with_addresses(addresses()),
        );

        let mut report = BatchReport::default();
        for (index, (address, payload)) in items.iter().enumerate() {
            let frame = build_frame(command, payload);
            debug!("Frame for {}: {}", address, hex_snippet(&frame, 48));
            self.bus
                .emit(self.tx_event(EventKind::TxStarted { index }, command, address));
            metrics::inc_tx_sent();
            let started = Instant::now();
            let outcome = self
                .connection
                .send_synchronous(address.wire(), frame, self.timeout())
                .await;
            let delivered = match outcome {
                Ok(status) if status.is_success() => {
                    metrics::inc_tx_acked();
                    metrics::observe_ack_latency(started);
                    debug!("{} acknowledged {} ({})", address, command, status);
                    self.bus.emit(self.tx_event(
                        EventKind::TxAckSuccess { index, status },
                        command,
                        address,
                    ));
                    true
                }
                Ok(status) => {
                    metrics::inc_tx_nacked();
                    warn!("{} did not acknowledge {}: {}", address, command, status);
                    self.bus.emit(
                        self.tx_event(EventKind::TxAckFailed { index, status }, command, address)
                            .with_message(status.to_string()),
                    );
                    false
                }
                Err(e @ WirelessError::TransmitTimeout { .. }) => {
                    metrics::inc_tx_timeouts();
                    warn!("{}", e);
                    self.bus.emit(
                        self.tx_event(EventKind::TxTimeout { index }, command, address)
                            .with_message(e.to_string()),
                    );
                    false
                }
                Err(e) => {
                    metrics::inc_tx_faults();
                    warn!("Sending {} to {} failed: {}", command, address, e);
                    self.bus.emit(
                        self.tx_event(EventKind::TxFailed { index }, command, address)
                            .with_message(e.to_string()),
                    );
                    false
                }
            };
            metrics::record_node_outcome(address.as_str(), delivered);
            if delivered {
                report.delivered.push(address.clone());
            } else {
                report.failed.push(address.clone());
            }
        }

        let successes = report.delivered.len();
        let failures = report.failed.len();
        let succeeded = report.all_delivered();
        metrics::inc_batch(succeeded);
        let kind = if succeeded {
            info!("{} delivered to all {} node(s)", command, successes);
            EventKind::BatchSucceeded {
                success_count: successes,
            }
        } else {
            warn!(
                "{} failed for {} of {} node(s)",
                command, failures, total
            );
            EventKind::BatchFailed {
                failure_count: failures,
            }
        };
        self.bus.emit(
            Event::new(kind, EventSource::Transceiver)
                .with_command(command)
                .with_addresses(addresses()),
        );
        report
    }
}
