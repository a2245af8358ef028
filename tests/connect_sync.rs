//! Connecting the host and pushing settings to the nodes.

mod common;

use common::{config_with_nodes, wait_until, Recorder, StubConnector};
use std::sync::Arc;
use std::time::Duration;
use ugate::events::EventKind;
use ugate::service::WirelessService;
use ugate::wireless::errors::WirelessError;
use ugate::wireless::settings::SETTINGS_COUNT;
use ugate::wireless::NodeAddress;

fn addr(s: &str) -> NodeAddress {
    NodeAddress::parse(s).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connect_pushes_settings_to_every_node() {
    let connector = StubConnector::acking();
    let mut config = config_with_nodes(&["0001", "0002"]);
    config.wireless.sync_on_connect = true;
    let service = WirelessService::new(
        &config,
        Arc::new(connector.clone()),
        tokio::runtime::Handle::current(),
    )
    .expect("service");
    let recorder = Recorder::attach(&service.bus);

    service.connect().await.expect("connect");

    let params = connector.state.connects.lock().unwrap().clone();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].port, "COM3");
    assert_eq!(params[0].baud_rate, 19200);

    let finished = wait_until(Duration::from_secs(5), || {
        recorder
            .find(|s| s.kind == EventKind::BatchSucceeded { success_count: 2 })
            .is_some()
    })
    .await;
    assert!(finished, "push after connect never completed: {:?}", recorder.names());
    assert!(
        wait_until(Duration::from_secs(1), || service
            .registry
            .nodes()
            .iter()
            .all(|n| n.device_synchronized))
        .await
    );

    let names = recorder.names();
    assert_eq!(&names[..2], &["HOST_CONNECTING", "HOST_CONNECTED"]);
    assert_eq!(recorder.count("REMOTE_NODE_SYNCHRONIZED"), 2);

    let calls = connector.state.calls();
    assert_eq!(calls.len(), 2);
    for call in calls {
        assert_eq!(call.data.len(), 2 + SETTINGS_COUNT);
        assert_eq!(&call.data[..2], &[105, 0]);
    }
}

#[tokio::test]
async fn refused_connection_is_reported() {
    let connector = StubConnector::refusing();
    let service = WirelessService::new(
        &config_with_nodes(&["0001"]),
        Arc::new(connector.clone()),
        tokio::runtime::Handle::current(),
    )
    .expect("service");
    let recorder = Recorder::attach(&service.bus);

    let err = service.connect().await.unwrap_err();
    match err {
        WirelessError::Connection { port, baud, cause } => {
            assert_eq!(port, "COM3");
            assert_eq!(baud, 19200);
            assert!(cause.contains("busy"), "{cause}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(recorder.names(), vec!["HOST_CONNECTING", "HOST_CONNECT_FAILED"]);
    assert!(!service.is_connected());
}

#[tokio::test]
async fn unsupported_baud_rate_fails_without_touching_the_port() {
    let connector = StubConnector::acking();
    let service = WirelessService::new(
        &config_with_nodes(&[]),
        Arc::new(connector.clone()),
        tokio::runtime::Handle::current(),
    )
    .expect("service");
    let recorder = Recorder::attach(&service.bus);

    let params = ugate::wireless::HostParams::new("COM3", 14400);
    assert!(matches!(
        service.connect_with(params).await,
        Err(WirelessError::Connection { baud: 14400, .. })
    ));
    assert!(connector.state.connects.lock().unwrap().is_empty());
    assert_eq!(recorder.names(), vec!["HOST_CONNECT_FAILED"]);
    assert!(recorder.all()[0].messages[0].contains("baud"));
}

#[tokio::test]
async fn push_while_disconnected_does_nothing() {
    let connector = StubConnector::acking();
    let service = WirelessService::new(
        &config_with_nodes(&["0001", "0002"]),
        Arc::new(connector.clone()),
        tokio::runtime::Handle::current(),
    )
    .expect("service");
    let recorder = Recorder::attach(&service.bus);

    assert!(!service.push_settings(None).await.unwrap());
    assert!(!service.push_settings(Some(&addr("0001"))).await.unwrap());
    assert!(connector.state.calls().is_empty());
    assert!(recorder.all().is_empty());
}

#[tokio::test]
async fn push_validates_before_sending() {
    let connector = StubConnector::acking();
    let service = WirelessService::new(
        &config_with_nodes(&["0001", "0002"]),
        Arc::new(connector.clone()),
        tokio::runtime::Handle::current(),
    )
    .expect("service");
    service.connect().await.expect("connect");

    assert!(matches!(
        service.push_settings(Some(&addr("0BAD"))).await,
        Err(WirelessError::UnknownAddress(a)) if a == "0BAD"
    ));

    // One bad value anywhere stops the whole batch
    service
        .registry
        .set_setting(&addr("0002"), ugate::wireless::SettingKey::CamAnglePan, 300)
        .unwrap();
    assert!(matches!(
        service.push_settings(None).await,
        Err(WirelessError::SettingOutOfRange { value: 300, .. })
    ));
    assert!(connector.state.calls().is_empty());
}

#[tokio::test]
async fn push_to_one_node_carries_its_settings() {
    let connector = StubConnector::acking();
    let service = WirelessService::new(
        &config_with_nodes(&["0001", "0002"]),
        Arc::new(connector.clone()),
        tokio::runtime::Handle::current(),
    )
    .expect("service");
    service.connect().await.expect("connect");
    service
        .registry
        .set_setting(&addr("0002"), ugate::wireless::SettingKey::AlarmsOn, 1)
        .unwrap();

    assert!(service.push_settings(Some(&addr("0002"))).await.unwrap());

    let calls = connector.state.calls_to("0002");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].data[2], 1);
    assert!(connector.state.calls_to("0001").is_empty());
    assert!(service.registry.get(&addr("0002")).unwrap().device_synchronized);
    assert!(!service.registry.get(&addr("0001")).unwrap().device_synchronized);
}
