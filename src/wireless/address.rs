//! 16-bit node address handling.
//!
//! Remote nodes are identified by a 4 hex digit string such as `"1A2B"`. On the
//! radio the same address travels as two bytes, most significant first:
//! `"1A2B"` becomes `MSB = 0x1A`, `LSB = 0x2B`.
//!
//! Validation happens here, before any I/O. Every other module works with the
//! already validated [`NodeAddress`] (upper-case normalized) or the raw
//! [`WireAddress`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::WirelessError;

/// Number of hex digits in a textual node address.
pub const ADDRESS_DIGITS: usize = 4;

/// Two byte address as carried in API frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireAddress {
    pub msb: u8,
    pub lsb: u8,
}

impl WireAddress {
    pub fn new(msb: u8, lsb: u8) -> Self {
        Self { msb, lsb }
    }

    pub fn from_u16(value: u16) -> Self {
        let [msb, lsb] = value.to_be_bytes();
        Self { msb, lsb }
    }

    pub fn as_u16(self) -> u16 {
        u16::from_be_bytes([self.msb, self.lsb])
    }
}

impl fmt::Display for WireAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.msb, self.lsb)
    }
}

/// Encode a textual address into its wire form.
///
/// The input must be exactly four hexadecimal characters (either case).
pub fn encode(address: &str) -> Result<WireAddress, WirelessError> {
    let invalid = || WirelessError::InvalidAddress(address.to_string());
    if address.len() != ADDRESS_DIGITS || !address.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let msb = u8::from_str_radix(&address[0..2], 16).map_err(|_| invalid())?;
    let lsb = u8::from_str_radix(&address[2..4], 16).map_err(|_| invalid())?;
    Ok(WireAddress { msb, lsb })
}

/// Decode a wire address back into its canonical upper-case text form.
pub fn decode(wire: WireAddress) -> String {
    format!("{:04X}", wire.as_u16())
}

/// Canonical form of a textual address, validating it along the way.
pub fn normalize(address: &str) -> Result<String, WirelessError> {
    encode(address).map(decode)
}

/// A validated remote node address, stored in canonical upper-case form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn parse(address: &str) -> Result<Self, WirelessError> {
        normalize(address).map(NodeAddress)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn wire(&self) -> WireAddress {
        // Validated at construction; recompute rather than store to keep one source of truth.
        let value = u16::from_str_radix(&self.0, 16).unwrap_or_default();
        WireAddress::from_u16(value)
    }
}

impl From<WireAddress> for NodeAddress {
    fn from(wire: WireAddress) -> Self {
        NodeAddress(decode(wire))
    }
}

impl FromStr for NodeAddress {
    type Err = WirelessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeAddress::parse(s)
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = WirelessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        NodeAddress::parse(&value)
    }
}

impl From<NodeAddress> for String {
    fn from(address: NodeAddress) -> Self {
        address.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
