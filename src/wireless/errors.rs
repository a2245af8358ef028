use thiserror::Error;

use super::command::Command;
use super::settings::SettingKey;

/// Errors surfaced by the wireless layer to its callers.
///
/// Precondition failures (`InvalidAddress`, `NoTargets`, `DuplicateAddress`,
/// `UnknownAddress`, `LastNodeCannotBeRemoved`, `SettingOutOfRange`,
/// `PayloadLength`) are
/// returned before any side effect. I/O failures are also published on the
/// event bus.
#[derive(Debug, Error)]
pub enum WirelessError {
    /// Address is not exactly four hexadecimal characters.
    #[error("invalid wireless address {0:?}: expected exactly 4 hex digits")]
    InvalidAddress(String),

    /// The radio channel could not be opened or claimed.
    #[error("unable to connect to local radio on {port} at {baud} baud: {cause}")]
    Connection {
        port: String,
        baud: u32,
        cause: String,
    },

    /// An operation needing the radio ran while the host is disconnected.
    #[error("local radio is not connected")]
    NotConnected,

    /// No acknowledgment arrived within the timeout window.
    #[error("no transmit status from {address} within {timeout_ms} ms")]
    TransmitTimeout { address: String, timeout_ms: u64 },

    /// The driver failed mid-exchange; the channel has been closed.
    #[error("transport fault: {0}")]
    TransportFault(String),

    /// An address query was answered with an error or is not supported by the driver.
    #[error("address query failed: {0}")]
    QueryFailed(String),

    /// A send was requested with an empty target set.
    #[error("no wireless node addresses to send data to")]
    NoTargets,

    #[error("remote node {0} already exists")]
    DuplicateAddress(String),

    #[error("remote node {0} is not registered")]
    UnknownAddress(String),

    /// Removing the only surviving node after others have existed.
    #[error("remote node {0} is the last remaining node and cannot be removed")]
    LastNodeCannotBeRemoved(String),

    /// A settings value does not fit the single byte it occupies on the wire.
    #[error("setting {key} value {value} does not fit in one byte")]
    SettingOutOfRange { key: SettingKey, value: i32 },

    /// The payload does not match the fixed length the firmware expects for the command.
    #[error("{command} takes {expected} payload byte(s), got {actual}")]
    PayloadLength {
        command: Command,
        expected: usize,
        actual: usize,
    },
}

/// Errors raised at the driver seam (serial port, frame exchange).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The driver waited the full timeout without a matching status frame.
    #[error("timed out waiting for response")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The radio answered with something that cannot be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The channel was closed underneath the caller.
    #[error("transport closed")]
    Closed,

    /// The transport was built without support for the requested operation.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<super::frame::FrameError> for TransportError {
    fn from(e: super::frame::FrameError) -> Self {
        TransportError::Protocol(e.to_string())
    }
}
