//! Remote node settings snapshot and its wire layout.
//!
//! The firmware reads the `SENSOR_SET_SETTINGS` payload positionally, one byte
//! per field, in exactly the order declared below. Reordering, inserting or
//! removing a field is a protocol change and needs a matching firmware build.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::WirelessError;

macro_rules! remote_settings {
    ($( $variant:ident => $field:ident, $key:literal, $default:expr; )+) => {
        /// Identifies one remotely synchronized setting.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum SettingKey {
            $( $variant, )+
        }

        impl SettingKey {
            /// Every key in wire order.
            pub const ALL: &'static [SettingKey] = &[ $( SettingKey::$variant, )+ ];

            /// Stable external name used in settings files.
            pub fn key(self) -> &'static str {
                match self {
                    $( SettingKey::$variant => $key, )+
                }
            }

            pub fn from_key(key: &str) -> Option<SettingKey> {
                SettingKey::ALL.iter().copied().find(|k| k.key() == key)
            }
        }

        /// Full settings snapshot of one remote node.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct RemoteSettings {
            $( pub $field: i32, )+
        }

        impl Default for RemoteSettings {
            fn default() -> Self {
                Self {
                    $( $field: $default, )+
                }
            }
        }

        impl RemoteSettings {
            pub fn get(&self, key: SettingKey) -> i32 {
                match key {
                    $( SettingKey::$variant => self.$field, )+
                }
            }

            /// Set a value, returning the previous one.
            pub fn set(&mut self, key: SettingKey, value: i32) -> i32 {
                let slot = match key {
                    $( SettingKey::$variant => &mut self.$field, )+
                };
                std::mem::replace(slot, value)
            }
        }
    };
}

remote_settings! {
    AlarmsOn => alarms_on, "alarmsOn", 0;
    UniversalRemoteAccessOn => universal_remote_access_on, "universalRemoteAccessOn", 0;
    UniversalRemoteAccessCode1 => universal_remote_access_code_1, "universalRemoteAccessCode1", 1;
    UniversalRemoteAccessCode2 => universal_remote_access_code_2, "universalRemoteAccessCode2", 2;
    UniversalRemoteAccessCode3 => universal_remote_access_code_3, "universalRemoteAccessCode3", 3;
    GateAccessOn => gate_access_on, "gateAccessOn", 1;
    SonarDistanceThresFeet => sonar_distance_thres_feet, "sonarDistanceThresFeet", 7;
    SonarDistanceThresInches => sonar_distance_thres_inches, "sonarDistanceThresInches", 0;
    SonarDelayBtwnTrips => sonar_delay_btwn_trips, "sonarDelayBtwnTrips", 0;
    PirDelayBtwnTrips => pir_delay_btwn_trips, "pirDelayBtwnTrips", 0;
    SonarPirAnglePan => sonar_pir_angle_pan, "sonarPirAnglePan", 0;
    SonarPirAngleTilt => sonar_pir_angle_tilt, "sonarPirAngleTilt", 0;
    MwSpeedThresCyclesPerSec => mw_speed_thres_cycles_per_sec, "mwSpeedThresCyclesPerSec", 10;
    MwDelayBtwnTrips => mw_delay_btwn_trips, "mwDelayBtwnTrips", 0;
    MwAnglePan => mw_angle_pan, "mwAnglePan", 0;
    LaserDistanceThresFeet => laser_distance_thres_feet, "laserDistanceThresFeet", 24;
    LaserDistanceThresInches => laser_distance_thres_inches, "laserDistanceThresInches", 0;
    LaserDelayBtwnTrips => laser_delay_btwn_trips, "laserDelayBtwnTrips", 0;
    LaserAnglePan => laser_angle_pan, "laserAnglePan", 0;
    LaserAngleTilt => laser_angle_tilt, "laserAngleTilt", 0;
    MultiAlarmTripState => multi_alarm_trip_state, "multiAlarmTripState", 0;
    CamResolution => cam_resolution, "camResolution", 0;
    CamAnglePan => cam_angle_pan, "camAnglePan", 90;
    CamAngleTilt => cam_angle_tilt, "camAngleTilt", 90;
    CamSonarTripAnglePriority => cam_sonar_trip_angle_priority, "camSonarTripAnglePriority", 4;
    CamSonarTripAnglePan => cam_sonar_trip_angle_pan, "camSonarTripAnglePan", 181;
    CamSonarTripAngleTilt => cam_sonar_trip_angle_tilt, "camSonarTripAngleTilt", 181;
    CamPirTripAnglePriority => cam_pir_trip_angle_priority, "camPirTripAnglePriority", 2;
    CamPirTripAnglePan => cam_pir_trip_angle_pan, "camPirTripAnglePan", 181;
    CamPirTripAngleTilt => cam_pir_trip_angle_tilt, "camPirTripAngleTilt", 181;
    CamMwTripAnglePriority => cam_mw_trip_angle_priority, "camMwTripAnglePriority", 3;
    CamMwTripAnglePan => cam_mw_trip_angle_pan, "camMwTripAnglePan", 181;
    CamMwTripAngleTilt => cam_mw_trip_angle_tilt, "camMwTripAngleTilt", 181;
    CamLaserTripAnglePriority => cam_laser_trip_angle_priority, "camLaserTripAnglePriority", 1;
    CamLaserTripAnglePan => cam_laser_trip_angle_pan, "camLaserTripAnglePan", 181;
    CamLaserTripAngleTilt => cam_laser_trip_angle_tilt, "camLaserTripAngleTilt", 181;
}

/// Number of settings carried in a `SENSOR_SET_SETTINGS` / `SENSOR_GET_SETTINGS` payload.
pub const SETTINGS_COUNT: usize = SettingKey::ALL.len();

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl RemoteSettings {
    /// Rebuild a snapshot from values in wire order. Returns `None` on a length mismatch.
    pub fn from_values(values: &[i32]) -> Option<Self> {
        if values.len() != SETTINGS_COUNT {
            return None;
        }
        let mut settings = RemoteSettings::default();
        for (key, value) in SettingKey::ALL.iter().zip(values) {
            settings.set(*key, *value);
        }
        Some(settings)
    }

    /// Flatten into the one-byte-per-field payload the firmware expects.
    pub fn to_payload(&self) -> Result<Vec<u8>, WirelessError> {
        SettingKey::ALL
            .iter()
            .map(|key| {
                let value = self.get(*key);
                u8::try_from(value).map_err(|_| WirelessError::SettingOutOfRange { key: *key, value })
            })
            .collect()
    }

    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let values: Vec<i32> = payload.iter().map(|b| i32::from(*b)).collect();
        Self::from_values(&values)
    }

    /// Keys whose values differ between two snapshots, in wire order.
    pub fn diff(&self, other: &RemoteSettings) -> Vec<SettingKey> {
        SettingKey::ALL
            .iter()
            .copied()
            .filter(|k| self.get(*k) != other.get(*k))
            .collect()
    }
}
