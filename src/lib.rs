//! # UGate - host side of a gate/sensor packet radio network
//!
//! A host computer with a local XBee radio (API mode, 16-bit addressing)
//! commands battery powered remote nodes: read sensors, toggle the gate,
//! calibrate the laser, and keep each node's settings in step with the host.
//!
//! ## Features
//!
//! - **Acknowledged sends**: every frame waits for the radio's TX status, with a bounded timeout.
//! - **Batches**: one command fanned out to many nodes, with per-node and aggregate outcome events.
//! - **Settings sync**: host settings pushed on connect and whenever a node reports drift.
//! - **Event bus**: synchronous, ordered publish/subscribe decoupling the radio layer from its callers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ugate::config::Config;
//! use ugate::service::WirelessService;
//! use ugate::wireless::{Command, SerialConnector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let service = WirelessService::new(
//!         &config,
//!         Arc::new(SerialConnector),
//!         tokio::runtime::Handle::current(),
//!     )?;
//!     service.bus.subscribe(|e: &ugate::events::Event| println!("{}", e.kind.name()));
//!     service.connect().await?;
//!     let all_ok = service.send(Command::SensorGetReadings, &[], &["1A2B"]).await?;
//!     println!("delivered: {all_ok}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`wireless`] - addressing, frames, transport, batches, registry, settings sync
//! - [`events`] - the event bus
//! - [`service`] - one wired-up instance of everything above
//! - [`config`] - TOML configuration
//! - [`metrics`], [`logutil`] - counters and log helpers

pub mod config;
pub mod events;
pub mod logutil;
pub mod metrics;
pub mod service;
pub mod wireless;
