//! Pushing host-side settings to remote nodes.
//!
//! Besides explicit [`SettingsSynchronizer::push`] calls, two bus listeners
//! trigger pushes on their own:
//! - after `HostConnected`, every node gets its settings (when enabled);
//! - when a node reports settings that differ from the host's copy and the node
//!   has `auto_synchronize` set, that node gets the host's settings back.
//!
//! Listeners run on the publisher's thread, so both spawn the push onto the
//! runtime handle captured at install time. They hold only a weak reference to
//! the synchronizer; dropping the service stops them.

use log::{debug, info, warn};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

use super::address::NodeAddress;
use super::command::Command;
use super::errors::WirelessError;
use super::registry::RemoteNodeRegistry;
use super::rx::RxData;
use super::transceiver::PacketTransceiver;
use crate::events::{Event, EventBus, EventKind, SubscriptionId};

#[derive(Debug)]
pub struct SettingsSynchronizer {
    transceiver: Arc<PacketTransceiver>,
    registry: Arc<RemoteNodeRegistry>,
}

impl SettingsSynchronizer {
    pub fn new(transceiver: Arc<PacketTransceiver>, registry: Arc<RemoteNodeRegistry>) -> Self {
        Self {
            transceiver,
            registry,
        }
    }

    /// Push local settings to `node`, or to every registered node when `None`.
    ///
    /// All nodes go out in a single batch, each with its own payload. Returns
    /// `Ok(false)` without any I/O when the radio is not connected. Nodes that
    /// acknowledge are marked synchronized.
    pub async fn push(&self, node: Option<&NodeAddress>) -> Result<bool, WirelessError> {
        if !self.transceiver.connection().is_connected() {
            warn!("Not connected; settings not sent");
            return Ok(false);
        }
        let nodes = match node {
            Some(address) => vec![self
                .registry
                .get(address)
                .ok_or_else(|| WirelessError::UnknownAddress(address.to_string()))?],
            None => self.registry.nodes(),
        };
        if nodes.is_empty() {
            return Err(WirelessError::NoTargets);
        }
        // Flatten everything before the first frame goes out
        let items = nodes
            .into_iter()
            .map(|n| Ok((n.address, n.settings.to_payload()?)))
            .collect::<Result<Vec<_>, WirelessError>>()?;

        info!("Sending settings to {} node(s)", items.len());
        let report = self
            .transceiver
            .send_each(Command::SensorSetSettings, &items)
            .await;
        for address in &report.delivered {
            if let Err(e) = self.registry.mark_synchronized(address, true) {
                // Removed while the batch was in flight
                debug!("Could not mark {} synchronized: {}", address, e);
            }
        }
        Ok(report.all_delivered())
    }

    /// Push to every node whenever the host connects.
    pub fn install_push_on_connect(self: &Arc<Self>, bus: &EventBus, handle: Handle) -> SubscriptionId {
        let weak: Weak<Self> = Arc::downgrade(self);
        bus.subscribe(move |event: &Event| {
            if event.kind != EventKind::HostConnected {
                return;
            }
            let Some(sync) = weak.upgrade() else {
                return;
            };
            handle.spawn(async move {
                match sync.push(None).await {
                    Ok(true) => info!("Settings synchronized with all nodes after connect"),
                    Ok(false) => warn!("Settings push after connect did not reach every node"),
                    Err(WirelessError::NoTargets) => debug!("No remote nodes to synchronize"),
                    Err(e) => warn!("Settings push after connect failed: {}", e),
                }
            });
        })
    }

    /// Compare settings reports from nodes with the host's copy.
    ///
    /// On divergence the node is marked out of sync and the event consumed;
    /// nodes with `auto_synchronize` get the host's settings pushed back.
    pub fn install_drift_listener(self: &Arc<Self>, bus: &EventBus, handle: Handle) -> SubscriptionId {
        let weak: Weak<Self> = Arc::downgrade(self);
        bus.subscribe(move |event: &Event| {
            let EventKind::DataRx { message } = &event.kind else {
                return;
            };
            let RxData::Settings(reported) = &message.data else {
                return;
            };
            let (Some(sync), Some(address)) = (weak.upgrade(), event.address().cloned()) else {
                return;
            };
            let drift = match sync.registry.check_drift(&address, reported) {
                Ok(drift) => drift,
                Err(e) => {
                    warn!("Settings report from {} ignored: {}", address, e);
                    return;
                }
            };
            if drift.is_empty() {
                return;
            }
            event.consume();
            let auto = sync
                .registry
                .get(&address)
                .map(|n| n.auto_synchronize)
                .unwrap_or(false);
            if !auto {
                info!(
                    "Remote node {} differs from host in {:?}; auto synchronize is off",
                    address, drift
                );
                return;
            }
            info!("Remote node {} differs from host; pushing host settings", address);
            handle.spawn(async move {
                if let Err(e) = sync.push(Some(&address)).await {
                    warn!("Automatic settings push to {} failed: {}", address, e);
                }
            });
        })
    }
}
