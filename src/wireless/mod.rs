//! Host <-> remote node communication over 16-bit addressed packet radio.
//!
//! Layering, leaf first:
//!
//! - [`address`], [`command`], [`settings`]: what goes on the wire
//! - [`frame`]: XBee API frames (escaped mode) carrying it
//! - [`transport`]: the blocking driver seam and its serial implementation
//! - [`connection`]: the single radio channel, serialized exchanges
//! - [`transceiver`]: command batches with per-node acknowledgment
//! - [`registry`], [`sync`]: known nodes and settings synchronization
//! - [`rx`]: data the nodes send back
//!
//! Progress and results are published on [`crate::events::EventBus`].

pub mod address;
pub mod command;
pub mod connection;
pub mod errors;
pub mod frame;
pub mod registry;
pub mod rx;
pub mod settings;
pub mod sync;
pub mod transceiver;
pub mod transport;

pub use address::{NodeAddress, WireAddress};
pub use command::Command;
pub use connection::ConnectionManager;
pub use errors::{TransportError, WirelessError};
pub use registry::{RemoteNode, RemoteNodeRegistry};
pub use settings::{RemoteSettings, SettingKey};
pub use sync::SettingsSynchronizer;
pub use transceiver::PacketTransceiver;
pub use transport::{Connector, HostParams, SerialConnector, Transport};
