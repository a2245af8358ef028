//! Interpretation of data remote nodes send to the host.
//!
//! Every RX payload starts with `[command id, failure count]`. What follows
//! depends on the command:
//!
//! | command                  | body                                         |
//! |--------------------------|----------------------------------------------|
//! | `SENSOR_GET_READINGS`    | 7 readings (see [`SensorReadings`])          |
//! | `SENSOR_GET_SETTINGS`    | every setting, one byte each, in wire order  |
//! | `ACCESS_PIN_CHANGE`      | the 3 key code digits                        |
//! | `SERVO_LASER_CALIBRATE`  | nothing, the failure count is the result     |
//! | `GATE_TOGGLE_OPEN_CLOSE` | nothing                                      |
//!
//! [`spawn_inbound_pump`] drains the transport's inbound channel, registers
//! unseen senders, and publishes `DataRx` / `DataRxFailed`.

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::address::NodeAddress;
use super::command::{Command, FrameStatus};
use super::registry::RemoteNodeRegistry;
use super::settings::{RemoteSettings, SETTINGS_COUNT};
use super::transport::InboundPacket;
use crate::events::{Event, EventBus, EventKind, EventSource};
use crate::logutil::hex_snippet;
use crate::metrics;

const HEADER_LEN: usize = 2;
const READINGS_COUNT: usize = 7;
const KEY_CODE_DIGITS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorReadings {
    pub sonar_feet: u8,
    pub sonar_inches: u8,
    pub microwave_cycle_count: u8,
    pub pir_intensity: u8,
    pub laser_feet: u8,
    pub laser_inches: u8,
    pub gate_state: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RxData {
    Readings(SensorReadings),
    /// Settings as the remote node currently holds them.
    Settings(RemoteSettings),
    KeyCodes { codes: [u8; KEY_CODE_DIGITS] },
    Calibration { succeeded: bool },
    GateToggled,
}

/// One interpreted RX payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RxMessage {
    pub rssi: u8,
    pub status: FrameStatus,
    pub failures: u8,
    pub data: RxData,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RxError {
    #[error("empty payload")]
    Empty,
    #[error("unrecognized command id {0}")]
    UnknownCommand(u8),
    #[error("{command} payload too short: expected {expected} bytes, got {actual}")]
    Truncated {
        command: Command,
        expected: usize,
        actual: usize,
    },
    #[error("{0} carries no data the host understands")]
    Unsupported(Command),
}

/// Decode a raw RX payload.
///
/// The command is returned alongside the error when it could be identified so
/// the failure event can name it.
pub fn interpret(rssi: u8, data: &[u8]) -> Result<(Command, RxMessage), (Option<Command>, RxError)> {
    let id = *data.first().ok_or((None, RxError::Empty))?;
    let command = Command::lookup(id).ok_or((None, RxError::UnknownCommand(id)))?;
    let need = |body: usize| {
        let expected = HEADER_LEN + body;
        if data.len() < expected {
            Err((
                Some(command),
                RxError::Truncated {
                    command,
                    expected,
                    actual: data.len(),
                },
            ))
        } else {
            Ok(&data[HEADER_LEN..expected])
        }
    };
    let failures = *data.get(1).ok_or((
        Some(command),
        RxError::Truncated {
            command,
            expected: HEADER_LEN,
            actual: data.len(),
        },
    ))?;
    let rx = match command {
        Command::SensorGetReadings => {
            let b = need(READINGS_COUNT)?;
            RxData::Readings(SensorReadings {
                sonar_feet: b[0],
                sonar_inches: b[1],
                microwave_cycle_count: b[2],
                pir_intensity: b[3],
                laser_feet: b[4],
                laser_inches: b[5],
                gate_state: b[6],
            })
        }
        Command::SensorGetSettings => {
            let b = need(SETTINGS_COUNT)?;
            let settings = RemoteSettings::from_payload(b).ok_or((
                Some(command),
                RxError::Truncated {
                    command,
                    expected: HEADER_LEN + SETTINGS_COUNT,
                    actual: data.len(),
                },
            ))?;
            RxData::Settings(settings)
        }
        Command::AccessPinChange => {
            let b = need(KEY_CODE_DIGITS)?;
            RxData::KeyCodes {
                codes: [b[0], b[1], b[2]],
            }
        }
        Command::ServoLaserCalibrate => RxData::Calibration {
            succeeded: failures == 0,
        },
        Command::GateToggleOpenClose => RxData::GateToggled,
        other => return Err((Some(other), RxError::Unsupported(other))),
    };
    Ok((
        command,
        RxMessage {
            rssi,
            status: FrameStatus::from_failures(failures),
            failures,
            data: rx,
        },
    ))
}

/// Turn one inbound packet into an event and publish it.
pub fn dispatch(packet: &InboundPacket, registry: &RemoteNodeRegistry, bus: &EventBus) {
    metrics::inc_rx_packets();
    let address = NodeAddress::from(packet.source);
    // Data from an address never seen before registers that node
    if let Err(e) = registry.ensure(&address) {
        warn!("Could not register sender {}: {}", address, e);
    }
    match interpret(packet.rssi, &packet.data) {
        Ok((command, message)) => {
            info!(
                "Received {} from {} (signal -{} dBm) with {} failure(s)",
                command, address, message.rssi, message.failures
            );
            bus.emit(
                Event::new(EventKind::DataRx { message }, EventSource::Inbound)
                    .with_command(command)
                    .with_address(address),
            );
        }
        Err((command, e)) => {
            metrics::inc_rx_rejected();
            warn!(
                "Rejected data from {}: {} (raw: {})",
                address,
                e,
                hex_snippet(&packet.data, 48)
            );
            let mut event = Event::new(EventKind::DataRxFailed, EventSource::Inbound)
                .with_address(address)
                .with_message(e.to_string());
            if let Some(c) = command {
                event = event.with_command(c);
            }
            bus.emit(event);
        }
    }
}

/// Drain `inbound` on `handle` until its sender side closes.
pub fn spawn_inbound_pump(
    handle: &Handle,
    mut inbound: mpsc::UnboundedReceiver<InboundPacket>,
    registry: Arc<RemoteNodeRegistry>,
    bus: Arc<EventBus>,
) -> JoinHandle<()> {
    handle.spawn(async move {
        while let Some(packet) = inbound.recv().await {
            dispatch(&packet, &registry, &bus);
        }
        debug!("Inbound channel closed; pump exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_follow_the_header() {
        let data = [103, 0, 7, 3, 12, 40, 24, 6, 1];
        let (command, msg) = interpret(40, &data).unwrap();
        assert_eq!(command, Command::SensorGetReadings);
        assert_eq!(msg.status, FrameStatus::Normal);
        match msg.data {
            RxData::Readings(r) => {
                assert_eq!(r.sonar_feet, 7);
                assert_eq!(r.sonar_inches, 3);
                assert_eq!(r.microwave_cycle_count, 12);
                assert_eq!(r.pir_intensity, 40);
                assert_eq!(r.laser_feet, 24);
                assert_eq!(r.laser_inches, 6);
                assert_eq!(r.gate_state, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn settings_report_rebuilds_snapshot() {
        let mut data = vec![104, 0];
        data.extend(RemoteSettings::default().to_payload().unwrap());
        let (_, msg) = interpret(30, &data).unwrap();
        assert_eq!(msg.data, RxData::Settings(RemoteSettings::default()));
    }

    #[test]
    fn key_codes_skip_failure_byte() {
        let (_, msg) = interpret(30, &[37, 0, 4, 5, 6]).unwrap();
        assert_eq!(msg.data, RxData::KeyCodes { codes: [4, 5, 6] });
    }

    #[test]
    fn calibration_result_comes_from_failures() {
        let (_, msg) = interpret(30, &[11, 2]).unwrap();
        assert_eq!(msg.status, FrameStatus::GeneralFailure);
        assert_eq!(msg.data, RxData::Calibration { succeeded: false });
    }

    #[test]
    fn rejects_unknown_short_and_unsupported() {
        assert_eq!(interpret(0, &[]).unwrap_err().1, RxError::Empty);
        assert_eq!(interpret(0, &[250, 0]).unwrap_err().1, RxError::UnknownCommand(250));
        assert!(matches!(
            interpret(0, &[103, 0, 1]).unwrap_err(),
            (Some(Command::SensorGetReadings), RxError::Truncated { expected: 9, actual: 3, .. })
        ));
        assert!(matches!(
            interpret(0, &[29, 0, 0xFF]).unwrap_err(),
            (_, RxError::Unsupported(Command::CamTakePic))
        ));
    }
}
