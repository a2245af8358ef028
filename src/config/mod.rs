//! # Configuration
//!
//! TOML configuration for the gateway host: which serial port the local radio
//! sits on, how patient to be with remote nodes, which nodes exist and the
//! settings each should run with, and where logs go.
//!
//! ```toml
//! [host]
//! port = "/dev/ttyUSB0"
//! baud_rate = 19200
//! address = "0001"
//!
//! [wireless]
//! tx_timeout_secs = 12
//! sync_on_connect = true
//! query_timeout_secs = 5
//!
//! [[nodes]]
//! address = "1A2B"
//! auto_synchronize = true
//!
//! [nodes.settings]
//! alarms_on = 1
//! cam_angle_pan = 45
//!
//! [logging]
//! level = "info"
//! file = "ugate.log"
//! ```
//!
//! Missing settings fall back to their firmware defaults. CLI flags take
//! precedence over the file: CLI args > Config file > Defaults.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tokio::fs;

use crate::wireless::address::NodeAddress;
use crate::wireless::registry::RemoteNode;
use crate::wireless::settings::RemoteSettings;
use crate::wireless::transport::{HostParams, ALLOWED_BAUD_RATES};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: HostConfig,
    #[serde(default)]
    pub wireless: WirelessConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub port: String,
    pub baud_rate: u32,
    /// 16-bit address the local radio is configured with (`MY`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<NodeAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirelessConfig {
    /// Wait for each node's transmit status (seconds).
    #[serde(default = "default_tx_timeout_secs")]
    pub tx_timeout_secs: u64,
    /// Push every node's settings right after connecting.
    #[serde(default = "default_sync_on_connect")]
    pub sync_on_connect: bool,
    /// Wait for an AT address query answer (seconds).
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

fn default_tx_timeout_secs() -> u64 {
    12
}

fn default_sync_on_connect() -> bool {
    true
}

fn default_query_timeout_secs() -> u64 {
    5
}

impl Default for WirelessConfig {
    fn default() -> Self {
        Self {
            tx_timeout_secs: default_tx_timeout_secs(),
            sync_on_connect: default_sync_on_connect(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

impl WirelessConfig {
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub address: NodeAddress,
    #[serde(default)]
    pub auto_synchronize: bool,
    #[serde(default)]
    pub settings: RemoteSettings,
}

impl NodeConfig {
    pub fn to_remote_node(&self) -> RemoteNode {
        RemoteNode {
            address: self.address.clone(),
            settings: self.settings.clone(),
            device_synchronized: false,
            auto_synchronize: self.auto_synchronize,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;
        Ok(())
    }

    /// Reject values the radio or the firmware cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.host.port.trim().is_empty() {
            return Err(anyhow!("host.port must not be empty"));
        }
        if !ALLOWED_BAUD_RATES.contains(&self.host.baud_rate) {
            return Err(anyhow!(
                "host.baud_rate {} is not one of {:?}",
                self.host.baud_rate,
                ALLOWED_BAUD_RATES
            ));
        }
        if self.wireless.tx_timeout_secs == 0 {
            return Err(anyhow!("wireless.tx_timeout_secs must be at least 1"));
        }
        if self.wireless.query_timeout_secs == 0 {
            return Err(anyhow!("wireless.query_timeout_secs must be at least 1"));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.address.clone()) {
                return Err(anyhow!("node {} is listed more than once", node.address));
            }
            node.settings
                .to_payload()
                .map_err(|e| anyhow!("node {}: {}", node.address, e))?;
        }
        Ok(())
    }

    pub fn host_params(&self) -> HostParams {
        HostParams::new(self.host.port.clone(), self.host.baud_rate)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: HostConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 19200,
                address: None,
            },
            wireless: WirelessConfig::default(),
            nodes: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: Some("ugate.log".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wireless.tx_timeout(), Duration::from_secs(12));
        assert!(config.wireless.sync_on_connect);
    }

    #[test]
    fn rejects_unsupported_baud_rate() {
        let mut config = Config::default();
        config.host.baud_rate = 14400;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("14400"), "{err}");
    }

    #[test]
    fn rejects_duplicate_nodes_and_oversized_settings() {
        let mut config = Config::default();
        let node = NodeConfig {
            address: NodeAddress::parse("1A2B").unwrap(),
            auto_synchronize: false,
            settings: RemoteSettings::default(),
        };
        config.nodes = vec![node.clone(), node.clone()];
        assert!(config.validate().is_err());

        let mut bad = node;
        bad.settings.cam_angle_pan = 400;
        config.nodes = vec![bad];
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_node_settings_use_defaults() {
        let toml_str = r#"
            [host]
            port = "COM3"
            baud_rate = 19200

            [[nodes]]
            address = "1a2b"

            [nodes.settings]
            alarms_on = 1

            [logging]
            level = "debug"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.nodes[0].address.as_str(), "1A2B");
        assert_eq!(config.nodes[0].settings.alarms_on, 1);
        assert_eq!(config.nodes[0].settings.cam_angle_pan, 90);
        assert_eq!(config.wireless.tx_timeout_secs, 12);
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn invalid_node_address_fails_to_parse() {
        let toml_str = r#"
            [host]
            port = "COM3"
            baud_rate = 19200

            [[nodes]]
            address = "XYZ"

            [logging]
            level = "info"
        "#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }
}
