//! Core value types used throughout the OpenLCB stack.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// 48-bit globally unique node identifier.
///
/// The all-zero value is a sentinel meaning "unknown" and is never placed on
/// the wire as a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; 6]);

impl NodeId {
    /// Sentinel for a node whose identity has not been learned yet.
    pub const UNKNOWN: Self = Self([0; 6]);

    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Build from the low 48 bits of a `u64`.
    pub fn from_u64(value: u64) -> Self {
        let b = value.to_be_bytes();
        Self([b[2], b[3], b[4], b[5], b[6], b[7]])
    }

    /// The identifier as a `u64` (high 16 bits zero).
    pub fn as_u64(self) -> u64 {
        let b = self.0;
        u64::from_be_bytes([0, 0, b[0], b[1], b[2], b[3], b[4], b[5]])
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }

    /// The 12-bit slice used by the `segment`-th Check-ID frame (1-based,
    /// most significant slice first).
    pub fn alias_seed_segment(self, segment: u8) -> u16 {
        debug_assert!((1..=4).contains(&segment));
        let shift = 48 - 12 * u32::from(segment);
        ((self.as_u64() >> shift) & 0xFFF) as u16
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}.{:02X}.{:02X}.{:02X}.{:02X}.{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for NodeId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(['.', ':']).collect();
        if parts.len() != 6 {
            return Err(ProtocolError::InvalidNodeId(s.to_string()));
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ProtocolError::InvalidNodeId(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 12-bit CAN-segment-local alias. `0x000` is reserved and never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias(u16);

impl Alias {
    /// Validates the `[0x001, 0xFFF]` range.
    pub fn new(raw: u16) -> Option<Self> {
        if (0x001..=0xFFF).contains(&raw) {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X}", self.0)
    }
}

/// 64-bit event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub [u8; 8]);

impl EventId {
    pub fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value.to_be_bytes())
    }

    pub fn as_u64(self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Event in the well-known range owned by `node` (node id + 16-bit suffix).
    pub fn for_node(node: NodeId, suffix: u16) -> Self {
        Self::from_u64((node.as_u64() << 16) | u64::from(suffix))
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02X}.{:02X}.{:02X}.{:02X}.{:02X}.{:02X}.{:02X}.{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Message Type Indicator.
///
/// The low 12 bits are what travels in a CAN frame's variable field. The two
/// datagram/stream MTIs are wider than 12 bits; on CAN they are represented
/// by dedicated frame types instead of the MTI field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mti(pub u16);

impl Mti {
    pub const INITIALIZATION_COMPLETE: Self = Self(0x100);
    pub const VERIFY_NODE_ID_ADDRESSED: Self = Self(0x488);
    pub const VERIFY_NODE_ID_GLOBAL: Self = Self(0x490);
    pub const VERIFIED_NODE_ID: Self = Self(0x170);
    pub const OPTIONAL_INTERACTION_REJECTED: Self = Self(0x068);
    pub const PROTOCOL_SUPPORT_INQUIRY: Self = Self(0x828);
    pub const PROTOCOL_SUPPORT_REPLY: Self = Self(0x668);
    pub const IDENTIFY_CONSUMER: Self = Self(0x8F4);
    pub const IDENTIFY_PRODUCER: Self = Self(0x914);
    pub const IDENTIFY_EVENTS_ADDRESSED: Self = Self(0x968);
    pub const IDENTIFY_EVENTS_GLOBAL: Self = Self(0x970);
    pub const LEARN_EVENT: Self = Self(0x594);
    pub const PC_EVENT_REPORT: Self = Self(0x5B4);
    pub const DATAGRAM: Self = Self(0x1C48);
    pub const DATAGRAM_ACKNOWLEDGED: Self = Self(0xA28);
    pub const DATAGRAM_REJECTED: Self = Self(0xA48);
    pub const STREAM_INITIATE_REQUEST: Self = Self(0xCC8);
    pub const STREAM_INITIATE_REPLY: Self = Self(0x868);
    pub const STREAM_DATA_SEND: Self = Self(0x1F88);
    pub const STREAM_DATA_PROCEED: Self = Self(0x888);
    pub const STREAM_DATA_COMPLETE: Self = Self(0x8A8);
    pub const SIMPLE_NODE_IDENT_INFO_REQUEST: Self = Self(0xDE8);
    pub const SIMPLE_NODE_IDENT_INFO_REPLY: Self = Self(0xA08);

    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Addressed messages carry a destination alias prefix in the payload.
    pub const fn is_addressed(self) -> bool {
        self.0 & 0x008 != 0
    }

    /// Event messages begin with an 8-byte event identifier.
    pub const fn carries_event(self) -> bool {
        self.0 & 0x004 != 0
    }

    /// Two-bit network priority (0 is highest).
    pub const fn priority(self) -> u8 {
        ((self.0 >> 10) & 0x3) as u8
    }

    /// Simple-protocol bit: set on messages simple nodes must understand.
    pub const fn is_simple(self) -> bool {
        self.0 & 0x010 != 0
    }

    /// Low two modifier bits.
    pub const fn modifier(self) -> u8 {
        (self.0 & 0x3) as u8
    }

    /// Whether the MTI fits the 12-bit variable field of a CAN frame.
    pub const fn fits_can_frame(self) -> bool {
        self.0 <= 0xFFF
    }
}

impl fmt::Display for Mti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:03X}", self.0)
    }
}
