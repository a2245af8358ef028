//! XBee API frame codec (escaped API mode, `AP=2`).
//!
//! Frames on the serial link look like:
//!
//!   `0x7E <len hi> <len lo> <frame data: api id + fields> <checksum>`
//!
//! Everything after the start delimiter is escaped: `0x7E`, `0x7D`, `0x11` and
//! `0x13` are sent as `0x7D, byte ^ 0x20`. The checksum is `0xFF` minus the low
//! byte of the sum of the frame data. Because a raw `0x7E` can only ever be a
//! start delimiter in this mode, the decoder resynchronizes on it: a delimiter
//! in the middle of a partial frame discards the partial frame.
use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;
use thiserror::Error;

use super::address::WireAddress;

pub const START: u8 = 0x7E;
pub const ESCAPE: u8 = 0x7D;
pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;

/// Upper bound on frame data length. 802.15.4 payloads top out near 100 bytes;
/// anything much larger is line noise.
const MAX_FRAME_DATA: usize = 512;

pub const API_TX_REQUEST_16: u8 = 0x01;
pub const API_AT_COMMAND: u8 = 0x08;
pub const API_REMOTE_AT_REQUEST: u8 = 0x17;
pub const API_RX_16: u8 = 0x81;
pub const API_AT_RESPONSE: u8 = 0x88;
pub const API_TX_STATUS: u8 = 0x89;
pub const API_REMOTE_AT_RESPONSE: u8 = 0x97;

/// Remote AT option: apply changes immediately.
const REMOTE_AT_APPLY: u8 = 0x02;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("checksum mismatch: computed {computed:#04x}, frame carried {carried:#04x}")]
    Checksum { computed: u8, carried: u8 },

    #[error("frame data length {0} exceeds limit")]
    Oversize(usize),

    #[error("api frame {api_id:#04x} truncated ({len} bytes)")]
    Truncated { api_id: u8, len: usize },

    #[error("empty frame")]
    Empty,
}

/// Delivery status reported by the local radio for a 16-bit TX request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TxStatus {
    Success,
    /// No MAC level acknowledgment from the remote node.
    NoAck,
    /// Clear channel assessment failed; the radio never got on air.
    CcaFailure,
    Purged,
    Other(u8),
}

impl TxStatus {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => TxStatus::Success,
            1 => TxStatus::NoAck,
            2 => TxStatus::CcaFailure,
            3 => TxStatus::Purged,
            other => TxStatus::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            TxStatus::Success => 0,
            TxStatus::NoAck => 1,
            TxStatus::CcaFailure => 2,
            TxStatus::Purged => 3,
            TxStatus::Other(b) => b,
        }
    }

    pub fn is_success(self) -> bool {
        self == TxStatus::Success
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxStatus::Success => f.write_str("SUCCESS"),
            TxStatus::NoAck => f.write_str("NO_ACK"),
            TxStatus::CcaFailure => f.write_str("CCA_FAILURE"),
            TxStatus::Purged => f.write_str("PURGED"),
            TxStatus::Other(b) => write!(f, "UNKNOWN({b})"),
        }
    }
}

/// Frames the host writes to the local radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    TxRequest16 {
        frame_id: u8,
        dest: WireAddress,
        options: u8,
        data: Vec<u8>,
    },
    AtCommand {
        frame_id: u8,
        command: [u8; 2],
        parameter: Vec<u8>,
    },
    /// Remote AT addressed by 16-bit address.
    RemoteAtRequest {
        frame_id: u8,
        dest: WireAddress,
        command: [u8; 2],
        parameter: Vec<u8>,
    },
}

impl OutboundFrame {
    pub fn frame_id(&self) -> u8 {
        match self {
            OutboundFrame::TxRequest16 { frame_id, .. }
            | OutboundFrame::AtCommand { frame_id, .. }
            | OutboundFrame::RemoteAtRequest { frame_id, .. } => *frame_id,
        }
    }

    /// Unescaped frame data (api id and fields, no delimiter/length/checksum).
    pub fn frame_data(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            OutboundFrame::TxRequest16 {
                frame_id,
                dest,
                options,
                data,
            } => {
                out.extend_from_slice(&[API_TX_REQUEST_16, *frame_id, dest.msb, dest.lsb, *options]);
                out.extend_from_slice(data);
            }
            OutboundFrame::AtCommand {
                frame_id,
                command,
                parameter,
            } => {
                out.extend_from_slice(&[API_AT_COMMAND, *frame_id, command[0], command[1]]);
                out.extend_from_slice(parameter);
            }
            OutboundFrame::RemoteAtRequest {
                frame_id,
                dest,
                command,
                parameter,
            } => {
                out.extend_from_slice(&[API_REMOTE_AT_REQUEST, *frame_id]);
                // 64-bit destination unused; 0x000000000000FFFF routes by the 16-bit field
                out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0xFF, 0xFF]);
                out.extend_from_slice(&[dest.msb, dest.lsb, REMOTE_AT_APPLY, command[0], command[1]]);
                out.extend_from_slice(parameter);
            }
        }
        out
    }

    /// Complete, escaped frame ready for the serial port.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame_data(&self.frame_data())
    }
}

/// Wrap frame data with delimiter, length and checksum, escaping as needed.
pub fn encode_frame_data(data: &[u8]) -> Vec<u8> {
    let len = data.len() as u16;
    let mut out = Vec::with_capacity(data.len() * 2 + 4);
    out.push(START);
    let [hi, lo] = len.to_be_bytes();
    push_escaped(&mut out, hi);
    push_escaped(&mut out, lo);
    for &b in data {
        push_escaped(&mut out, b);
    }
    push_escaped(&mut out, checksum(data));
    out
}

fn push_escaped(out: &mut Vec<u8>, b: u8) {
    if needs_escape(b) {
        out.push(ESCAPE);
        out.push(b ^ 0x20);
    } else {
        out.push(b);
    }
}

fn needs_escape(b: u8) -> bool {
    matches!(b, START | ESCAPE | XON | XOFF)
}

pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0xFF - sum
}

/// Frames the local radio hands to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    TxStatus {
        frame_id: u8,
        status: TxStatus,
    },
    Rx16 {
        source: WireAddress,
        rssi: u8,
        options: u8,
        data: Vec<u8>,
    },
    AtResponse {
        frame_id: u8,
        command: [u8; 2],
        status: u8,
        value: Vec<u8>,
    },
    RemoteAtResponse {
        frame_id: u8,
        source64: u64,
        source: WireAddress,
        command: [u8; 2],
        status: u8,
        value: Vec<u8>,
    },
    Unknown {
        api_id: u8,
        data: Vec<u8>,
    },
}

impl InboundFrame {
    /// Parse unescaped frame data (api id first).
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        let (&api_id, rest) = data.split_first().ok_or(FrameError::Empty)?;
        let truncated = || FrameError::Truncated {
            api_id,
            len: data.len(),
        };
        match api_id {
            API_TX_STATUS => {
                if rest.len() < 2 {
                    return Err(truncated());
                }
                Ok(InboundFrame::TxStatus {
                    frame_id: rest[0],
                    status: TxStatus::from_byte(rest[1]),
                })
            }
            API_RX_16 => {
                if rest.len() < 4 {
                    return Err(truncated());
                }
                Ok(InboundFrame::Rx16 {
                    source: WireAddress::new(rest[0], rest[1]),
                    rssi: rest[2],
                    options: rest[3],
                    data: rest[4..].to_vec(),
                })
            }
            API_AT_RESPONSE => {
                if rest.len() < 4 {
                    return Err(truncated());
                }
                Ok(InboundFrame::AtResponse {
                    frame_id: rest[0],
                    command: [rest[1], rest[2]],
                    status: rest[3],
                    value: rest[4..].to_vec(),
                })
            }
            API_REMOTE_AT_RESPONSE => {
                if rest.len() < 14 {
                    return Err(truncated());
                }
                let mut src64 = [0u8; 8];
                src64.copy_from_slice(&rest[1..9]);
                Ok(InboundFrame::RemoteAtResponse {
                    frame_id: rest[0],
                    source64: u64::from_be_bytes(src64),
                    source: WireAddress::new(rest[9], rest[10]),
                    command: [rest[11], rest[12]],
                    status: rest[13],
                    value: rest[14..].to_vec(),
                })
            }
            _ => Ok(InboundFrame::Unknown {
                api_id,
                data: rest.to_vec(),
            }),
        }
    }
}

/// Incremental decoder for escaped API frames.
///
/// Feed arbitrary chunks with [`FrameDecoder::push`] and drain results with
/// [`FrameDecoder::next_frame`]. Corrupt frames come out as errors so the
/// caller can log them; the decoder itself keeps going.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    current: BytesMut,
    in_frame: bool,
    escaped: bool,
    ready: VecDeque<Result<InboundFrame, FrameError>>,
    discarded: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            current: BytesMut::with_capacity(128),
            ..Default::default()
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        for &raw in data {
            if raw == START {
                if !self.current.is_empty() {
                    self.discarded += self.current.len();
                    self.current.clear();
                }
                self.in_frame = true;
                self.escaped = false;
                continue;
            }
            if !self.in_frame {
                self.discarded += 1;
                continue;
            }
            if raw == ESCAPE {
                self.escaped = true;
                continue;
            }
            let b = if self.escaped {
                self.escaped = false;
                raw ^ 0x20
            } else {
                raw
            };
            self.current.put_u8(b);
            self.try_complete();
        }
    }

    fn try_complete(&mut self) {
        if self.current.len() < 2 {
            return;
        }
        let len = u16::from_be_bytes([self.current[0], self.current[1]]) as usize;
        if len > MAX_FRAME_DATA {
            self.discarded += self.current.len();
            self.reset();
            self.ready.push_back(Err(FrameError::Oversize(len)));
            return;
        }
        // length prefix + frame data + checksum
        if self.current.len() < len + 3 {
            return;
        }
        let frame = self.current.split().freeze();
        self.in_frame = false;
        self.escaped = false;
        let body = &frame[2..2 + len];
        let carried = frame[2 + len];
        let computed = checksum(body);
        let result = if computed != carried {
            Err(FrameError::Checksum { computed, carried })
        } else {
            InboundFrame::parse(body)
        };
        self.ready.push_back(result);
    }

    fn reset(&mut self) {
        self.current.clear();
        self.in_frame = false;
        self.escaped = false;
    }

    pub fn next_frame(&mut self) -> Option<Result<InboundFrame, FrameError>> {
        self.ready.pop_front()
    }

    /// Bytes thrown away while hunting for a start delimiter or dropping broken frames.
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}
