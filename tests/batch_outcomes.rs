//! Batch aggregation: per-address outcome events and the aggregate result.

mod common;

use common::{config_with_nodes, Recorder, Reply, StubConnector};
use std::sync::Arc;
use std::time::Duration;
use ugate::events::EventKind;
use ugate::service::WirelessService;
use ugate::wireless::command::Command;
use ugate::wireless::errors::WirelessError;
use ugate::wireless::frame::TxStatus;

fn service(connector: &StubConnector, timeout_ms: u64) -> WirelessService {
    let config = config_with_nodes(&[]);
    let service = WirelessService::new(
        &config,
        Arc::new(connector.clone()),
        tokio::runtime::Handle::current(),
    )
    .expect("service");
    service
        .transceiver
        .set_timeout(Duration::from_millis(timeout_ms));
    service
}

#[tokio::test]
async fn get_readings_nacked_reports_single_failure() {
    let connector = StubConnector::new(Reply::Nack(TxStatus::NoAck));
    let service = service(&connector, 500);
    service.connect().await.expect("connect");
    let recorder = Recorder::attach(&service.bus);

    let ok = service
        .send(Command::SensorGetReadings, &[], &["1A2B"])
        .await
        .expect("preconditions hold");

    assert!(!ok);
    assert_eq!(
        recorder.names(),
        vec!["BATCH_STARTED", "TX_STARTED", "TX_ACK_FAILED", "BATCH_FAILED"]
    );
    let seen = recorder.all();
    assert_eq!(seen[2].kind, EventKind::TxAckFailed { index: 0, status: TxStatus::NoAck });
    assert_eq!(seen[3].kind, EventKind::BatchFailed { failure_count: 1 });
    assert_eq!(seen[3].addresses, vec!["1A2B".to_string()]);

    let calls = connector.state.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].data, vec![103, 0]);
}

#[tokio::test]
async fn all_acknowledged_batch_succeeds() {
    let connector = StubConnector::acking();
    let service = service(&connector, 500);
    service.connect().await.expect("connect");
    let recorder = Recorder::attach(&service.bus);

    let ok = service
        .send(Command::ServoCamMove, &[90, 45], &["0001", "0002", "0003"])
        .await
        .unwrap();

    assert!(ok);
    assert_eq!(recorder.count("TX_STARTED"), 3);
    assert_eq!(recorder.count("TX_ACK_SUCCESS"), 3);
    let last = recorder.all().pop().unwrap();
    assert_eq!(last.kind, EventKind::BatchSucceeded { success_count: 3 });
    assert_eq!(last.addresses, vec!["0001", "0002", "0003"]);
    for call in connector.state.calls() {
        assert_eq!(call.data, vec![100, 0, 90, 45]);
    }
}

#[tokio::test]
async fn mixed_outcomes_do_not_stop_the_batch() {
    let connector = StubConnector::acking()
        .reply_for("0002", Reply::Nack(TxStatus::CcaFailure))
        .reply_for("0003", Reply::Silent);
    let service = service(&connector, 150);
    service.connect().await.expect("connect");
    let recorder = Recorder::attach(&service.bus);

    let ok = service
        .send(Command::SensorAlarmToggle, &[], &["0001", "0002", "0003", "0004"])
        .await
        .unwrap();

    assert!(!ok);
    assert_eq!(connector.state.calls().len(), 4);
    assert_eq!(recorder.count("TX_STARTED"), 4);
    assert_eq!(recorder.count("TX_ACK_SUCCESS"), 2);
    assert_eq!(recorder.count("TX_ACK_FAILED"), 1);
    assert_eq!(recorder.count("TX_TIMEOUT"), 1);
    let timeout = recorder
        .find(|s| matches!(s.kind, EventKind::TxTimeout { .. }))
        .unwrap();
    assert_eq!(timeout.kind, EventKind::TxTimeout { index: 2 });
    assert_eq!(timeout.addresses, vec!["0003"]);
    assert_eq!(
        recorder.all().pop().unwrap().kind,
        EventKind::BatchFailed { failure_count: 2 }
    );
    // A timeout is not a fault; the channel stays open
    assert!(service.is_connected());
}

#[tokio::test]
async fn preconditions_fail_before_any_io() {
    let connector = StubConnector::acking();
    let service = service(&connector, 500);
    service.connect().await.expect("connect");
    let recorder = Recorder::attach(&service.bus);

    let empty: [&str; 0] = [];
    assert!(matches!(
        service.send(Command::SensorGetReadings, &[], &empty).await,
        Err(WirelessError::NoTargets)
    ));
    assert!(matches!(
        service
            .send(Command::SensorGetReadings, &[], &["0001", "12G4"])
            .await,
        Err(WirelessError::InvalidAddress(a)) if a == "12G4"
    ));
    assert!(matches!(
        service.send(Command::ServoCamMove, &[90], &["0001"]).await,
        Err(WirelessError::PayloadLength { expected: 2, actual: 1, .. })
    ));
    assert!(matches!(
        service.send(Command::SensorGetReadings, &[1], &["0001"]).await,
        Err(WirelessError::PayloadLength { expected: 0, actual: 1, .. })
    ));
    assert!(connector.state.calls().is_empty());
    assert!(recorder.all().is_empty());
}

#[tokio::test]
async fn repeated_targets_are_sent_once() {
    let connector = StubConnector::acking();
    let service = service(&connector, 500);
    service.connect().await.expect("connect");
    let recorder = Recorder::attach(&service.bus);

    let ok = service
        .send(Command::SensorGetReadings, &[], &["1A2B", "0001", "1a2b"])
        .await
        .unwrap();

    assert!(ok);
    let seen = recorder.all();
    assert_eq!(seen[0].kind, EventKind::BatchStarted { total: 2 });
    assert_eq!(seen[0].addresses, vec!["1A2B", "0001"]);
    assert_eq!(recorder.count("TX_STARTED"), 2);
    assert_eq!(
        seen.last().unwrap().kind,
        EventKind::BatchSucceeded { success_count: 2 }
    );
    assert_eq!(connector.state.calls_to("1A2B").len(), 1);
}

#[tokio::test]
async fn transport_fault_closes_channel_and_fails_remaining() {
    let connector = StubConnector::acking().reply_for("0001", Reply::Fault);
    let service = service(&connector, 500);
    service.connect().await.expect("connect");
    let recorder = Recorder::attach(&service.bus);

    let ok = service
        .send(Command::GateToggleOpenClose, &[], &["0001", "0002"])
        .await
        .unwrap();

    assert!(!ok);
    assert!(!service.is_connected());
    assert_eq!(connector.state.closes.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(
        recorder.names(),
        vec![
            "BATCH_STARTED",
            "TX_STARTED",
            "HOST_DISCONNECTING",
            "HOST_DISCONNECTED",
            "TX_FAILED",
            "TX_STARTED",
            "TX_FAILED",
            "BATCH_FAILED",
        ]
    );
    // Only the first address reached the driver
    assert_eq!(connector.state.calls().len(), 1);

    // A fresh open starts clean
    service.connect().await.expect("reconnect");
    assert!(service
        .send(Command::GateToggleOpenClose, &[], &["0002"])
        .await
        .unwrap());
}

#[tokio::test]
async fn sending_while_disconnected_fails_every_address() {
    let connector = StubConnector::acking();
    let service = service(&connector, 500);
    let recorder = Recorder::attach(&service.bus);

    let ok = service
        .send(Command::CamTakePic, &[], &["0001", "0002"])
        .await
        .unwrap();

    assert!(!ok);
    assert_eq!(recorder.count("TX_FAILED"), 2);
    assert_eq!(
        recorder.all().pop().unwrap().kind,
        EventKind::BatchFailed { failure_count: 2 }
    );
    assert!(connector.state.calls().is_empty());
}
