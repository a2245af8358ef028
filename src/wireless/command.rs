//! Command catalogue shared with the remote node firmware.
//!
//! The numeric id of each command is the first byte of every frame payload and
//! must match the firmware's `CMD_*` definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status byte carried at payload offset 1.
///
/// Outbound frames always carry [`FrameStatus::Normal`]. Inbound frames use the
/// same slot for the number of failures the node hit while executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameStatus {
    Normal,
    GeneralFailure,
    ParsingError,
}

impl FrameStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            FrameStatus::Normal => 0,
            FrameStatus::GeneralFailure => 1,
            FrameStatus::ParsingError => 2,
        }
    }

    /// Status of an inbound frame from its failure count byte.
    pub fn from_failures(failures: u8) -> Self {
        if failures == 0 {
            FrameStatus::Normal
        } else {
            FrameStatus::GeneralFailure
        }
    }
}

/// Status byte every outbound frame carries.
pub const STATUS_NORMAL: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    ServoLaserCalibrate,
    ServoTiltUp,
    ServoTiltDown,
    ServoPanRight,
    ServoPanLeft,
    IrRemoteSessionReset,
    SensorAlarmToggle,
    CamTakePic,
    AccessPinChange,
    ServoToggleCamSonarIrMicrowave,
    GateToggleOpenClose,
    ServoCamMove,
    ServoSonarPirMove,
    ServoMicrowaveMove,
    SensorGetReadings,
    SensorGetSettings,
    SensorSetSettings,
}

impl Command {
    pub const ALL: [Command; 17] = [
        Command::ServoLaserCalibrate,
        Command::ServoTiltUp,
        Command::ServoTiltDown,
        Command::ServoPanRight,
        Command::ServoPanLeft,
        Command::IrRemoteSessionReset,
        Command::SensorAlarmToggle,
        Command::CamTakePic,
        Command::AccessPinChange,
        Command::ServoToggleCamSonarIrMicrowave,
        Command::GateToggleOpenClose,
        Command::ServoCamMove,
        Command::ServoSonarPirMove,
        Command::ServoMicrowaveMove,
        Command::SensorGetReadings,
        Command::SensorGetSettings,
        Command::SensorSetSettings,
    ];

    /// Wire id (payload byte 0).
    pub fn id(self) -> u8 {
        match self {
            Command::ServoLaserCalibrate => 11,
            Command::ServoTiltUp => 16,
            Command::ServoTiltDown => 17,
            Command::ServoPanRight => 18,
            Command::ServoPanLeft => 19,
            Command::IrRemoteSessionReset => 20,
            Command::SensorAlarmToggle => 21,
            Command::CamTakePic => 29,
            Command::AccessPinChange => 37,
            Command::ServoToggleCamSonarIrMicrowave => 58,
            Command::GateToggleOpenClose => 59,
            Command::ServoCamMove => 100,
            Command::ServoSonarPirMove => 101,
            Command::ServoMicrowaveMove => 102,
            Command::SensorGetReadings => 103,
            Command::SensorGetSettings => 104,
            Command::SensorSetSettings => 105,
        }
    }

    pub fn lookup(id: u8) -> Option<Command> {
        Command::ALL.iter().copied().find(|c| c.id() == id)
    }

    /// Number of payload bytes following the two byte header, when fixed.
    /// `None` means the command carries a variable length payload (settings).
    pub fn data_bytes(self) -> Option<usize> {
        match self {
            Command::ServoCamMove | Command::ServoSonarPirMove | Command::ServoMicrowaveMove => {
                Some(2)
            }
            Command::SensorSetSettings => None,
            _ => Some(0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::ServoLaserCalibrate => "SERVO_LASER_CALIBRATE",
            Command::ServoTiltUp => "SERVO_TILT_UP",
            Command::ServoTiltDown => "SERVO_TILT_DOWN",
            Command::ServoPanRight => "SERVO_PAN_RIGHT",
            Command::ServoPanLeft => "SERVO_PAN_LEFT",
            Command::IrRemoteSessionReset => "IR_REMOTE_SESSION_RESET",
            Command::SensorAlarmToggle => "SENSOR_ALARM_TOGGLE",
            Command::CamTakePic => "CAM_TAKE_PIC",
            Command::AccessPinChange => "ACCESS_PIN_CHANGE",
            Command::ServoToggleCamSonarIrMicrowave => "SERVO_TOGGLE_CAM_SONARIR_MICROWAVE",
            Command::GateToggleOpenClose => "GATE_TOGGLE_OPEN_CLOSE",
            Command::ServoCamMove => "SERVO_CAM_MOVE",
            Command::ServoSonarPirMove => "SERVO_SONAR_PIR_MOVE",
            Command::ServoMicrowaveMove => "SERVO_MICROWAVE_MOVE",
            Command::SensorGetReadings => "SENSOR_GET_READINGS",
            Command::SensorGetSettings => "SENSOR_GET_SETTINGS",
            Command::SensorSetSettings => "SENSOR_SET_SETTINGS",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id = {})", self.name(), self.id())
    }
}

impl FromStr for Command {
    type Err = String;

    /// Accepts the firmware name (`SENSOR_GET_READINGS`), a few short aliases,
    /// or the numeric id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase().replace('-', "_");
        if let Ok(id) = upper.parse::<u8>() {
            return Command::lookup(id).ok_or_else(|| format!("unknown command id {id}"));
        }
        let alias = match upper.as_str() {
            "GET_READINGS" | "READINGS" => Some(Command::SensorGetReadings),
            "GET_SETTINGS" => Some(Command::SensorGetSettings),
            "SET_SETTINGS" => Some(Command::SensorSetSettings),
            "TOGGLE_GATE" | "GATE" => Some(Command::GateToggleOpenClose),
            "CALIBRATE" => Some(Command::ServoLaserCalibrate),
            "TAKE_PIC" => Some(Command::CamTakePic),
            "ALARM_TOGGLE" => Some(Command::SensorAlarmToggle),
            _ => None,
        };
        alias
            .or_else(|| Command::ALL.iter().copied().find(|c| c.name() == upper))
            .ok_or_else(|| format!("unknown command {s:?}"))
    }
}
