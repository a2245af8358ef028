//! One wired-up instance of the wireless layer.
//!
//! [`WirelessService`] owns the event bus and every component that publishes
//! on it, registers the nodes from the configuration and installs the
//! synchronization listeners. Callers subscribe to [`WirelessService::bus`] to
//! follow progress.

use log::{debug, info};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::events::EventBus;
use crate::wireless::address::{NodeAddress, WireAddress};
use crate::wireless::command::Command;
use crate::wireless::connection::ConnectionManager;
use crate::wireless::errors::WirelessError;
use crate::wireless::registry::RemoteNodeRegistry;
use crate::wireless::rx::spawn_inbound_pump;
use crate::wireless::sync::SettingsSynchronizer;
use crate::wireless::transceiver::PacketTransceiver;
use crate::wireless::transport::{Connector, HostParams};

pub struct WirelessService {
    pub bus: Arc<EventBus>,
    pub connection: Arc<ConnectionManager>,
    pub transceiver: Arc<PacketTransceiver>,
    pub registry: Arc<RemoteNodeRegistry>,
    pub synchronizer: Arc<SettingsSynchronizer>,
    host: HostParams,
    query_timeout: Duration,
    handle: Handle,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl WirelessService {
    /// Build the service from configuration. Listeners spawn their async work on `handle`.
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        handle: Handle,
    ) -> Result<Self, WirelessError> {
        let bus = Arc::new(EventBus::new());
        let connection = Arc::new(ConnectionManager::new(bus.clone(), connector));
        let transceiver = Arc::new(
            PacketTransceiver::new(connection.clone(), bus.clone())
                .with_timeout(config.wireless.tx_timeout()),
        );
        let registry = Arc::new(RemoteNodeRegistry::new(bus.clone()));
        for node in &config.nodes {
            registry.insert(node.to_remote_node())?;
        }
        let synchronizer = Arc::new(SettingsSynchronizer::new(
            transceiver.clone(),
            registry.clone(),
        ));
        if config.wireless.sync_on_connect {
            synchronizer.install_push_on_connect(&bus, handle.clone());
        }
        synchronizer.install_drift_listener(&bus, handle.clone());
        debug!(
            "Wireless service ready with {} node(s), tx timeout {:?}",
            registry.len(),
            transceiver.timeout()
        );
        Ok(Self {
            bus,
            connection,
            transceiver,
            registry,
            synchronizer,
            host: config.host_params(),
            query_timeout: config.wireless.query_timeout(),
            handle,
            pump: Mutex::new(None),
        })
    }

    pub fn host_params(&self) -> &HostParams {
        &self.host
    }

    /// Connect with the configured host parameters.
    pub async fn connect(&self) -> Result<(), WirelessError> {
        self.connect_with(self.host.clone()).await
    }

    /// Connect and start routing inbound data onto the bus.
    pub async fn connect_with(&self, params: HostParams) -> Result<(), WirelessError> {
        self.stop_pump();
        self.connection.open(params).await?;
        if let Some(inbound) = self.connection.take_inbound() {
            let pump = spawn_inbound_pump(
                &self.handle,
                inbound,
                self.registry.clone(),
                self.bus.clone(),
            );
            *self.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(pump);
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), WirelessError> {
        let result = self.connection.close().await;
        self.stop_pump();
        result
    }

    fn stop_pump(&self) {
        if let Some(pump) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pump.abort();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn send<S: AsRef<str>>(
        &self,
        command: Command,
        payload: &[u8],
        targets: &[S],
    ) -> Result<bool, WirelessError> {
        self.transceiver.send(command, payload, targets).await
    }

    pub async fn push_settings(&self, node: Option<&NodeAddress>) -> Result<bool, WirelessError> {
        self.synchronizer.push(node).await
    }

    /// Ask the local radio (`None`) or a remote node for its 16-bit address.
    pub async fn probe(&self, target: Option<&NodeAddress>) -> Result<WireAddress, WirelessError> {
        let address = self
            .connection
            .query_address(target.map(NodeAddress::wire), self.query_timeout)
            .await?;
        info!(
            "{} answered with address {}",
            target.map_or_else(|| "Local radio".to_string(), |t| format!("Node {t}")),
            address
        );
        Ok(address)
    }
}

impl Drop for WirelessService {
    fn drop(&mut self) {
        self.stop_pump();
    }
}
