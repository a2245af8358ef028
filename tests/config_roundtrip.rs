//! Configuration files on disk.

use tempfile::tempdir;
use ugate::config::{Config, NodeConfig};
use ugate::wireless::{NodeAddress, RemoteSettings};

#[tokio::test]
async fn default_file_loads_and_edits_survive_a_save() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path = path.to_str().unwrap();

    Config::create_default(path).await.unwrap();
    let mut config = Config::load(path).await.unwrap();
    assert_eq!(config.host.baud_rate, 19200);
    assert!(config.nodes.is_empty());

    let mut settings = RemoteSettings::default();
    settings.cam_angle_pan = 45;
    config.host.port = "COM3".to_string();
    config.wireless.tx_timeout_secs = 5;
    config.nodes.push(NodeConfig {
        address: NodeAddress::parse("1a2b").unwrap(),
        auto_synchronize: true,
        settings,
    });
    config.save(path).await.unwrap();

    let reloaded = Config::load(path).await.unwrap();
    assert_eq!(reloaded.host.port, "COM3");
    assert_eq!(reloaded.wireless.tx_timeout().as_secs(), 5);
    assert_eq!(reloaded.nodes.len(), 1);
    let node = &reloaded.nodes[0];
    assert_eq!(node.address.as_str(), "1A2B");
    assert!(node.auto_synchronize);
    assert_eq!(node.settings.cam_angle_pan, 45);
    assert_eq!(node.settings.cam_angle_tilt, 90);
}

#[tokio::test]
async fn invalid_files_are_rejected() {
    let dir = tempdir().unwrap();

    let bad_baud = dir.path().join("baud.toml");
    std::fs::write(
        &bad_baud,
        "[host]\nport = \"COM3\"\nbaud_rate = 14400\n",
    )
    .unwrap();
    let err = Config::load(bad_baud.to_str().unwrap()).await.unwrap_err();
    assert!(err.to_string().contains("14400"), "{err}");

    let bad_address = dir.path().join("address.toml");
    std::fs::write(
        &bad_address,
        "[host]\nport = \"COM3\"\nbaud_rate = 9600\n\n[[nodes]]\naddress = \"12G4\"\n",
    )
    .unwrap();
    assert!(Config::load(bad_address.to_str().unwrap()).await.is_err());

    assert!(Config::load(dir.path().join("missing.toml").to_str().unwrap())
        .await
        .is_err());
}
