//! CAN frame layer.
//!
//! A [`CanFrame`] is a 29-bit extended identifier plus 0-8 payload bytes.
//! The identifier decomposes as:
//!
//! ```text
//! ┌──────────────┬───────────────┬─────────────────────┬──────────────────┐
//! │ reserved (1) │ msg/ctrl (1)  │ variable field (15) │ source alias (12)│
//! └──────────────┴───────────────┴─────────────────────┴──────────────────┘
//! ```
//!
//! For OpenLCB-message frames the variable field is a 3-bit frame type and a
//! 12-bit value (the MTI, or the destination alias for datagram and stream
//! frames). For CAN control frames it holds the CID/RID/AMD/AME/AMR codes
//! used by alias arbitration.

pub mod gridconnect;

pub use gridconnect::GridConnectCodec;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{ProtocolError, Result};
use crate::types::{Alias, Mti, NodeId};

/// Bit 28: always set on OpenLCB traffic.
const RESERVED_BIT: u32 = 1 << 28;
/// Bit 27: set for OpenLCB-message frames, clear for CAN control frames.
const MESSAGE_BIT: u32 = 1 << 27;
/// Mask of the 29 significant header bits.
pub const HEADER_MASK: u32 = 0x1FFF_FFFF;

/// Maximum payload bytes in one CAN frame.
pub const MAX_FRAME_PAYLOAD: usize = 8;

/// Frame type codes for OpenLCB-message frames (variable field bits 14-12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Global or addressed message; low 12 bits carry the MTI.
    Mti = 1,
    /// Complete datagram in a single frame; low 12 bits carry the destination.
    DatagramComplete = 2,
    /// First frame of a multi-frame datagram.
    DatagramFirst = 3,
    /// Middle frame of a multi-frame datagram.
    DatagramMiddle = 4,
    /// Final frame of a multi-frame datagram.
    DatagramFinal = 5,
    /// Stream data; low 12 bits carry the destination.
    StreamData = 7,
}

impl FrameType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Mti),
            2 => Some(Self::DatagramComplete),
            3 => Some(Self::DatagramFirst),
            4 => Some(Self::DatagramMiddle),
            5 => Some(Self::DatagramFinal),
            7 => Some(Self::StreamData),
            _ => None,
        }
    }
}

/// Continuation flags in the two-byte destination prefix of addressed
/// messages (upper nibble of the first prefix byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressedFlag {
    /// Single-frame message.
    Only = 0x0,
    /// First frame of a sequence.
    First = 0x1,
    /// Last frame of a sequence.
    Last = 0x2,
    /// Interior frame of a sequence.
    Middle = 0x3,
}

impl AddressedFlag {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0x0 => Self::Only,
            0x1 => Self::First,
            0x2 => Self::Last,
            _ => Self::Middle,
        }
    }

    /// True when this frame closes a message (Only or Last).
    pub fn terminates(self) -> bool {
        matches!(self, Self::Only | Self::Last)
    }

    /// True when this frame may start a fresh message (Only or First).
    pub fn starts(self) -> bool {
        matches!(self, Self::Only | Self::First)
    }
}

/// Control-frame codes in the variable field (frame-type bit clear).
const RID_CODE: u16 = 0x0700;
const AMD_CODE: u16 = 0x0701;
const AME_CODE: u16 = 0x0702;
const AMR_CODE: u16 = 0x0703;

/// One CAN frame: 29-bit header plus up to 8 payload bytes.
///
/// Unused payload bytes are always zero, so derived equality compares frames
/// by wire content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanFrame {
    header: u32,
    len: u8,
    data: [u8; 8],
}

impl CanFrame {
    /// Create a frame from a raw header and payload.
    pub fn new(header: u32, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_FRAME_PAYLOAD,
            }
            .into());
        }
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            header: header & HEADER_MASK,
            len: payload.len() as u8,
            data,
        })
    }

    // ------------------------------------------------------------------
    // Constructors: OpenLCB-message frames
    // ------------------------------------------------------------------

    /// Global or addressed message frame carrying `mti` in the variable field.
    pub fn openlcb_message(mti: Mti, source: Alias, payload: &[u8]) -> Result<Self> {
        debug_assert!(mti.fits_can_frame());
        let header = RESERVED_BIT
            | MESSAGE_BIT
            | (u32::from(FrameType::Mti as u8) << 24)
            | (u32::from(mti.raw()) << 12)
            | u32::from(source.raw());
        Self::new(header, payload)
    }

    /// Datagram frame; `frame_type` must be one of the four datagram types.
    pub fn datagram(
        frame_type: FrameType,
        destination: Alias,
        source: Alias,
        payload: &[u8],
    ) -> Result<Self> {
        debug_assert!(matches!(
            frame_type,
            FrameType::DatagramComplete
                | FrameType::DatagramFirst
                | FrameType::DatagramMiddle
                | FrameType::DatagramFinal
        ));
        let header = RESERVED_BIT
            | MESSAGE_BIT
            | (u32::from(frame_type as u8) << 24)
            | (u32::from(destination.raw()) << 12)
            | u32::from(source.raw());
        Self::new(header, payload)
    }

    /// Stream data frame.
    pub fn stream_data(destination: Alias, source: Alias, payload: &[u8]) -> Result<Self> {
        let header = RESERVED_BIT
            | MESSAGE_BIT
            | (u32::from(FrameType::StreamData as u8) << 24)
            | (u32::from(destination.raw()) << 12)
            | u32::from(source.raw());
        Self::new(header, payload)
    }

    // ------------------------------------------------------------------
    // Constructors: CAN control frames
    // ------------------------------------------------------------------

    fn control(variable: u16, source: Alias, payload: &[u8]) -> Self {
        let header = RESERVED_BIT
            | (u32::from(variable & 0x7FFF) << 12)
            | u32::from(source.raw());
        // Control payloads are at most a 6-byte node id.
        Self::new(header, payload).expect("control payload within frame limit")
    }

    /// Check-ID frame `sequence` (1-4) claiming `alias` for `node`.
    pub fn check_id(sequence: u8, node: NodeId, alias: Alias) -> Self {
        debug_assert!((1..=4).contains(&sequence));
        let top = u16::from(8 - sequence); // CID1 -> 7 ... CID4 -> 4
        let variable = (top << 12) | node.alias_seed_segment(sequence);
        Self::control(variable, alias, &[])
    }

    /// Reserve-ID frame for `alias`.
    pub fn reserve_id(alias: Alias) -> Self {
        Self::control(RID_CODE, alias, &[])
    }

    /// Alias-Map-Definition frame announcing the `alias` ↔ `node` binding.
    pub fn alias_map_definition(node: NodeId, alias: Alias) -> Self {
        Self::control(AMD_CODE, alias, node.as_bytes())
    }

    /// Alias-Map-Enquiry frame. With a node id payload, only that node
    /// answers; without, every node on the segment answers.
    pub fn alias_map_enquiry(node: Option<NodeId>, source: Alias) -> Self {
        match node {
            Some(n) => Self::control(AME_CODE, source, n.as_bytes()),
            None => Self::control(AME_CODE, source, &[]),
        }
    }

    /// Alias-Map-Reset frame relinquishing `alias`.
    pub fn alias_map_reset(node: NodeId, alias: Alias) -> Self {
        Self::control(AMR_CODE, alias, node.as_bytes())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn header(&self) -> u32 {
        self.header
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Low 12 header bits.
    pub fn source_alias(&self) -> u16 {
        (self.header & 0xFFF) as u16
    }

    /// 15-bit variable field.
    pub fn variable_field(&self) -> u16 {
        ((self.header >> 12) & 0x7FFF) as u16
    }

    /// Frame-type bit: OpenLCB message vs CAN control frame.
    pub fn is_openlcb_message(&self) -> bool {
        self.header & MESSAGE_BIT != 0
    }

    /// Three-bit frame type code of an OpenLCB-message frame.
    pub fn frame_type(&self) -> Option<FrameType> {
        if !self.is_openlcb_message() {
            return None;
        }
        FrameType::from_code(((self.header >> 24) & 0x7) as u8)
    }

    /// The MTI, for frames of type [`FrameType::Mti`].
    pub fn mti(&self) -> Option<Mti> {
        match self.frame_type() {
            Some(FrameType::Mti) => Some(Mti(self.variable_field() & 0xFFF)),
            _ => None,
        }
    }

    /// Destination alias, for datagram and stream frames (carried in the
    /// variable field) or addressed MTI frames (carried in the payload
    /// prefix).
    pub fn destination_alias(&self) -> Option<u16> {
        match self.frame_type()? {
            FrameType::Mti => self.addressed_prefix().map(|(_, alias)| alias),
            _ => Some(self.variable_field() & 0xFFF),
        }
    }

    /// Continuation flag and destination alias from the two-byte payload
    /// prefix of an addressed MTI frame.
    pub fn addressed_prefix(&self) -> Option<(AddressedFlag, u16)> {
        let mti = self.mti()?;
        if !mti.is_addressed() || self.len < 2 {
            return None;
        }
        let prefix = BigEndian::read_u16(&self.data[..2]);
        Some((AddressedFlag::from_bits((prefix >> 12) as u8), prefix & 0xFFF))
    }

    /// The 6-byte node id carried by frames that announce one
    /// (InitializationComplete, VerifiedNodeID, AMD, AMR, AME-with-target).
    pub fn node_id(&self) -> Option<NodeId> {
        if self.len < 6 {
            return None;
        }
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&self.data[..6]);
        Some(NodeId::new(bytes))
    }

    // ------------------------------------------------------------------
    // Classification predicates
    // ------------------------------------------------------------------

    fn has_mti(&self, mti: Mti) -> bool {
        self.mti() == Some(mti)
    }

    fn is_control_code(&self, code: u16) -> bool {
        !self.is_openlcb_message() && self.variable_field() == code
    }

    pub fn is_initialization_complete(&self) -> bool {
        self.has_mti(Mti::INITIALIZATION_COMPLETE)
    }

    pub fn is_verified_node_id(&self) -> bool {
        self.has_mti(Mti::VERIFIED_NODE_ID)
    }

    pub fn is_alias_map_definition(&self) -> bool {
        self.is_control_code(AMD_CODE)
    }

    pub fn is_alias_map_reset(&self) -> bool {
        self.is_control_code(AMR_CODE)
    }

    pub fn is_alias_map_enquiry(&self) -> bool {
        self.is_control_code(AME_CODE)
    }

    pub fn is_reserve_id(&self) -> bool {
        self.is_control_code(RID_CODE)
    }

    /// Check-ID sequence number (1-4) if this is a CID frame.
    pub fn check_id_sequence(&self) -> Option<u8> {
        if self.is_openlcb_message() {
            return None;
        }
        let top = (self.variable_field() >> 12) as u8;
        if (4..=7).contains(&top) {
            Some(8 - top)
        } else {
            None
        }
    }

    pub fn is_check_id(&self) -> bool {
        self.check_id_sequence().is_some()
    }

    /// CID, RID, AMD, AME, or AMR.
    pub fn is_control_frame(&self) -> bool {
        !self.is_openlcb_message()
    }
}
