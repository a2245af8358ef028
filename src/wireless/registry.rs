//! In-memory index of the remote nodes this host talks to.
//!
//! Each node carries the settings the host wants it to run with and whether the
//! device is known to hold exactly those settings. Nodes are kept in insertion
//! order so fan-out to "all nodes" is deterministic.
//!
//! Once more than one node has ever been registered, the registry refuses to
//! drop the last remaining one.

use log::{debug, info};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use super::address::NodeAddress;
use super::errors::WirelessError;
use super::settings::{RemoteSettings, SettingKey};
use crate::events::{Event, EventBus, EventKind, EventSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteNode {
    pub address: NodeAddress,
    pub settings: RemoteSettings,
    /// The device holds exactly `settings`.
    pub device_synchronized: bool,
    /// Push local settings automatically when the device reports different ones.
    pub auto_synchronize: bool,
}

impl RemoteNode {
    pub fn new(address: NodeAddress) -> Self {
        Self {
            address,
            settings: RemoteSettings::default(),
            device_synchronized: false,
            auto_synchronize: false,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    nodes: Vec<RemoteNode>,
    had_multiple: bool,
}

#[derive(Debug)]
pub struct RemoteNodeRegistry {
    inner: Mutex<Inner>,
    bus: Arc<EventBus>,
}

impl RemoteNodeRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bus,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, kind: EventKind, address: &NodeAddress) {
        self.bus
            .emit(Event::new(kind, EventSource::Registry).with_address(address.clone()));
    }

    /// Register a node with default settings.
    pub fn add(&self, address: &NodeAddress) -> Result<RemoteNode, WirelessError> {
        self.insert(RemoteNode::new(address.clone()))
    }

    /// Register a fully described node (used when loading configuration).
    pub fn insert(&self, node: RemoteNode) -> Result<RemoteNode, WirelessError> {
        {
            let mut inner = self.lock();
            if inner.nodes.iter().any(|n| n.address == node.address) {
                return Err(WirelessError::DuplicateAddress(node.address.to_string()));
            }
            inner.nodes.push(node.clone());
            if inner.nodes.len() > 1 {
                inner.had_multiple = true;
            }
        }
        info!("Remote node {} added", node.address);
        self.emit(EventKind::RemoteNodeAdded, &node.address);
        Ok(node)
    }

    /// Existing node for `address`, or a freshly added one.
    pub fn ensure(&self, address: &NodeAddress) -> Result<RemoteNode, WirelessError> {
        match self.get(address) {
            Some(node) => Ok(node),
            None => match self.add(address) {
                // Lost a race with a concurrent add
                Err(WirelessError::DuplicateAddress(_)) => self
                    .get(address)
                    .ok_or_else(|| WirelessError::UnknownAddress(address.to_string())),
                other => other,
            },
        }
    }

    pub fn remove(&self, address: &NodeAddress) -> Result<RemoteNode, WirelessError> {
        let removed = {
            let mut inner = self.lock();
            let pos = inner
                .nodes
                .iter()
                .position(|n| &n.address == address)
                .ok_or_else(|| WirelessError::UnknownAddress(address.to_string()))?;
            if inner.nodes.len() == 1 && inner.had_multiple {
                return Err(WirelessError::LastNodeCannotBeRemoved(address.to_string()));
            }
            inner.nodes.remove(pos)
        };
        info!("Remote node {} removed", address);
        self.emit(EventKind::RemoteNodeRemoved, address);
        Ok(removed)
    }

    pub fn get(&self, address: &NodeAddress) -> Option<RemoteNode> {
        self.lock()
            .nodes
            .iter()
            .find(|n| &n.address == address)
            .cloned()
    }

    pub fn addresses(&self) -> Vec<NodeAddress> {
        self.lock().nodes.iter().map(|n| n.address.clone()).collect()
    }

    pub fn nodes(&self) -> Vec<RemoteNode> {
        self.lock().nodes.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record whether the device holds the local settings. Publishes only on change.
    pub fn mark_synchronized(
        &self,
        address: &NodeAddress,
        in_sync: bool,
    ) -> Result<(), WirelessError> {
        let changed = {
            let mut inner = self.lock();
            let node = inner
                .nodes
                .iter_mut()
                .find(|n| &n.address == address)
                .ok_or_else(|| WirelessError::UnknownAddress(address.to_string()))?;
            let changed = node.device_synchronized != in_sync;
            node.device_synchronized = in_sync;
            changed
        };
        if changed {
            debug!("Remote node {} synchronized = {}", address, in_sync);
            let kind = if in_sync {
                EventKind::RemoteNodeSynchronized
            } else {
                EventKind::RemoteNodeOutOfSync
            };
            self.emit(kind, address);
        }
        Ok(())
    }

    /// Edit one local setting. The device no longer matches, so the node goes out of sync.
    pub fn set_setting(
        &self,
        address: &NodeAddress,
        key: SettingKey,
        value: i32,
    ) -> Result<i32, WirelessError> {
        let old = {
            let mut inner = self.lock();
            let node = inner
                .nodes
                .iter_mut()
                .find(|n| &n.address == address)
                .ok_or_else(|| WirelessError::UnknownAddress(address.to_string()))?;
            node.settings.set(key, value)
        };
        if old != value {
            self.bus.emit(
                Event::new(EventKind::SettingChanged, EventSource::Registry)
                    .with_address(address.clone())
                    .with_setting(key, old, value),
            );
            self.mark_synchronized(address, false)?;
        }
        Ok(old)
    }

    pub fn set_auto_synchronize(
        &self,
        address: &NodeAddress,
        enabled: bool,
    ) -> Result<(), WirelessError> {
        let mut inner = self.lock();
        let node = inner
            .nodes
            .iter_mut()
            .find(|n| &n.address == address)
            .ok_or_else(|| WirelessError::UnknownAddress(address.to_string()))?;
        node.auto_synchronize = enabled;
        Ok(())
    }

    /// Compare a settings report from the device with the local copy and
    /// update the node's sync flag accordingly.
    ///
    /// Returns the keys that differ; empty means the device is in sync.
    pub fn check_drift(
        &self,
        address: &NodeAddress,
        reported: &RemoteSettings,
    ) -> Result<Vec<SettingKey>, WirelessError> {
        let local = self
            .get(address)
            .ok_or_else(|| WirelessError::UnknownAddress(address.to_string()))?;
        let drift = local.settings.diff(reported);
        if drift.is_empty() {
            self.mark_synchronized(address, true)?;
        } else {
            info!(
                "Remote node {} reports {} setting(s) different from the host",
                address,
                drift.len()
            );
            self.mark_synchronized(address, false)?;
        }
        Ok(drift)
    }
}
