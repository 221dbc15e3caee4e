//! Bidirectional conversion between [`Message`]s and CAN frames.
//!
//! The outbound path resolves aliases, encodes message bodies, and splits
//! addressed payloads across continuation frames. The inbound path decodes
//! frames back into messages, reassembling multi-frame addressed messages
//! and datagrams. Reassembly state is keyed per source so interleaved
//! senders cannot corrupt each other.

use std::collections::HashMap;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use tracing::{trace, warn};

use crate::alias::AliasMap;
use crate::error::{ProtocolError, Result};
use crate::frame::{AddressedFlag, CanFrame, FrameType, MAX_FRAME_PAYLOAD};
use crate::message::Message;
use crate::types::{Alias, EventId, Mti, NodeId};

/// Default cap on buffered bytes per reassembly entry. A peer that never
/// terminates a sequence is cut off here.
pub const DEFAULT_REASSEMBLY_CAP: usize = 64 * 1024;

/// Maximum datagram body on CAN.
pub const MAX_DATAGRAM_PAYLOAD: usize = 72;

/// User bytes per addressed frame after the two-byte destination prefix.
const ADDRESSED_CHUNK: usize = MAX_FRAME_PAYLOAD - 2;

/// Message ↔ frame codec bound to one alias registry.
pub struct MessageBuilder {
    aliases: Arc<AliasMap>,
    /// Open addressed-message buffers, keyed by (source alias, MTI).
    reassembly: HashMap<(u16, u16), Vec<u8>>,
    /// Open datagram buffers, keyed by (source alias, destination alias).
    datagrams: HashMap<(u16, u16), Vec<u8>>,
    reassembly_cap: usize,
}

impl MessageBuilder {
    pub fn new(aliases: Arc<AliasMap>) -> Self {
        Self::with_reassembly_cap(aliases, DEFAULT_REASSEMBLY_CAP)
    }

    pub fn with_reassembly_cap(aliases: Arc<AliasMap>, reassembly_cap: usize) -> Self {
        Self {
            aliases,
            reassembly: HashMap::new(),
            datagrams: HashMap::new(),
            reassembly_cap,
        }
    }

    // ------------------------------------------------------------------
    // Outbound: Message -> frames
    // ------------------------------------------------------------------

    /// Render `msg` onto CAN frames.
    ///
    /// Fails when the source (or, for addressed messages, the destination)
    /// node has no alias registered yet.
    pub fn process_message(&self, msg: &Message) -> Result<Vec<CanFrame>> {
        let source = msg.source();
        let source_alias = self
            .aliases
            .alias_for(source)
            .ok_or(ProtocolError::UnknownSourceAlias(source))?;

        match msg {
            Message::Datagram {
                destination,
                payload,
                ..
            } => {
                let dest_alias = self.resolve_destination(*destination)?;
                datagram_frames(dest_alias, source_alias, payload)
            }
            Message::StreamDataSend {
                destination,
                payload,
                ..
            } => {
                let dest_alias = self.resolve_destination(*destination)?;
                stream_frames(dest_alias, source_alias, payload)
            }
            _ if msg.is_addressed() => {
                let destination = msg
                    .destination()
                    .expect("addressed message carries a destination");
                let dest_alias = self.resolve_destination(destination)?;
                let mti = msg.mti();
                if !mti.fits_can_frame() {
                    return Err(ProtocolError::UnrepresentableMessage(mti.raw()).into());
                }
                addressed_frames(mti, source_alias, dest_alias, &message_body(msg))
            }
            _ => {
                let mti = msg.mti();
                if !mti.fits_can_frame() {
                    return Err(ProtocolError::UnrepresentableMessage(mti.raw()).into());
                }
                Ok(vec![CanFrame::openlcb_message(
                    mti,
                    source_alias,
                    &message_body(msg),
                )?])
            }
        }
    }

    fn resolve_destination(&self, destination: NodeId) -> Result<Alias> {
        self.aliases
            .alias_for(destination)
            .ok_or_else(|| ProtocolError::UnknownDestinationAlias(destination).into())
    }

    // ------------------------------------------------------------------
    // Inbound: frame -> messages
    // ------------------------------------------------------------------

    /// Decode one inbound frame.
    ///
    /// Control frames and continuation frames that leave a message open
    /// yield `None`; a frame that completes (or is) a whole message yields
    /// the decoded messages. Malformed frames are logged and dropped.
    pub fn process_frame(&mut self, frame: &CanFrame) -> Option<Vec<Message>> {
        if frame.is_control_frame() {
            return None;
        }
        let source = self.aliases.node_for_or_unknown(frame.source_alias());

        match frame.frame_type()? {
            FrameType::Mti => {
                let mti = frame.mti()?;
                if mti.is_addressed() {
                    self.process_addressed(frame, mti, source)
                } else {
                    decode_global(mti, source, frame.data()).map(|m| vec![m])
                }
            }
            FrameType::DatagramComplete => {
                let destination = self.destination_node(frame);
                self.datagrams
                    .remove(&datagram_key(frame));
                Some(vec![Message::Datagram {
                    source,
                    destination,
                    payload: frame.data().to_vec(),
                }])
            }
            FrameType::DatagramFirst => {
                self.datagrams
                    .insert(datagram_key(frame), frame.data().to_vec());
                None
            }
            FrameType::DatagramMiddle => {
                self.append_datagram(frame);
                None
            }
            FrameType::DatagramFinal => {
                self.append_datagram(frame)?;
                let payload = self
                    .datagrams
                    .remove(&datagram_key(frame))
                    .unwrap_or_default();
                let destination = self.destination_node(frame);
                Some(vec![Message::Datagram {
                    source,
                    destination,
                    payload,
                }])
            }
            FrameType::StreamData => {
                let destination = self.destination_node(frame);
                Some(vec![Message::StreamDataSend {
                    source,
                    destination,
                    payload: frame.data().to_vec(),
                }])
            }
        }
    }

    fn destination_node(&self, frame: &CanFrame) -> NodeId {
        frame
            .destination_alias()
            .map_or(NodeId::UNKNOWN, |a| self.aliases.node_for_or_unknown(a))
    }

    fn process_addressed(
        &mut self,
        frame: &CanFrame,
        mti: Mti,
        source: NodeId,
    ) -> Option<Vec<Message>> {
        let Some((flag, dest_alias)) = frame.addressed_prefix() else {
            warn!(header = frame.header(), "addressed frame missing destination prefix");
            return None;
        };
        let destination = self.aliases.node_for_or_unknown(dest_alias);
        let key = (frame.source_alias(), mti.raw());
        let rest = &frame.data()[2..];

        let body = match flag {
            AddressedFlag::Only => {
                // A stale open buffer is abandoned in favor of the fresh start.
                self.reassembly.remove(&key);
                rest.to_vec()
            }
            AddressedFlag::First => {
                self.reassembly.insert(key, rest.to_vec());
                return None;
            }
            AddressedFlag::Middle => {
                self.buffer_continuation(key, rest)?;
                return None;
            }
            AddressedFlag::Last => {
                self.buffer_continuation(key, rest)?;
                self.reassembly.remove(&key).unwrap_or_default()
            }
        };

        trace!(%mti, len = body.len(), "addressed message reassembled");
        Some(vec![decode_addressed(mti, source, destination, &body)])
    }

    /// Append continuation bytes, starting fresh when no buffer is open.
    /// Returns `None` when the entry blows the cap (the entry is dropped).
    fn buffer_continuation(&mut self, key: (u16, u16), rest: &[u8]) -> Option<()> {
        let buffer = self.reassembly.entry(key).or_default();
        if buffer.len() + rest.len() > self.reassembly_cap {
            warn!(
                alias = key.0,
                size = buffer.len() + rest.len(),
                cap = self.reassembly_cap,
                "dropping oversized reassembly buffer"
            );
            self.reassembly.remove(&key);
            return None;
        }
        buffer.extend_from_slice(rest);
        Some(())
    }

    fn append_datagram(&mut self, frame: &CanFrame) -> Option<()> {
        let key = datagram_key(frame);
        let buffer = self.datagrams.entry(key).or_default();
        if buffer.len() + frame.len() > MAX_DATAGRAM_PAYLOAD {
            warn!(
                source = key.0,
                "dropping datagram exceeding maximum length"
            );
            self.datagrams.remove(&key);
            return None;
        }
        buffer.extend_from_slice(frame.data());
        Some(())
    }
}

fn datagram_key(frame: &CanFrame) -> (u16, u16) {
    (
        frame.source_alias(),
        frame.destination_alias().unwrap_or(0),
    )
}

// ----------------------------------------------------------------------
// Body encoding
// ----------------------------------------------------------------------

fn protocols_bytes(protocols: u64) -> Vec<u8> {
    let b = protocols.to_be_bytes();
    b[2..8].to_vec()
}

fn message_body(msg: &Message) -> Vec<u8> {
    match msg {
        Message::InitializationComplete { source } => source.as_bytes().to_vec(),
        Message::VerifyNodeIdGlobal { target, .. }
        | Message::VerifyNodeIdAddressed { target, .. } => {
            target.map_or_else(Vec::new, |n| n.as_bytes().to_vec())
        }
        Message::VerifiedNodeId { node, .. } => node.as_bytes().to_vec(),
        Message::OptionalInteractionRejected {
            error_code,
            rejected_mti,
            ..
        } => {
            let mut body = vec![0u8; 4];
            BigEndian::write_u16(&mut body[0..2], *error_code);
            BigEndian::write_u16(&mut body[2..4], *rejected_mti);
            body
        }
        Message::ProtocolSupportInquiry { .. } => Vec::new(),
        Message::ProtocolSupportReply { protocols, .. } => protocols_bytes(*protocols),
        Message::IdentifyConsumer { event, .. }
        | Message::IdentifyProducer { event, .. }
        | Message::LearnEvent { event, .. }
        | Message::ProducerConsumerEventReport { event, .. } => event.as_bytes().to_vec(),
        Message::IdentifyEventsGlobal { .. } | Message::IdentifyEventsAddressed { .. } => {
            Vec::new()
        }
        Message::DatagramAcknowledged { flags, .. } => {
            if *flags == 0 {
                Vec::new()
            } else {
                vec![*flags]
            }
        }
        Message::DatagramRejected { error_code, .. } => error_code.to_be_bytes().to_vec(),
        Message::StreamInitiateRequest {
            buffer_size,
            source_stream_id,
            ..
        } => {
            let mut body = vec![0u8; 5];
            BigEndian::write_u16(&mut body[0..2], *buffer_size);
            body[4] = *source_stream_id;
            body
        }
        Message::StreamInitiateReply {
            buffer_size,
            source_stream_id,
            destination_stream_id,
            ..
        } => {
            let mut body = vec![0u8; 6];
            BigEndian::write_u16(&mut body[0..2], *buffer_size);
            body[4] = *source_stream_id;
            body[5] = *destination_stream_id;
            body
        }
        Message::StreamDataProceed {
            source_stream_id,
            destination_stream_id,
            ..
        }
        | Message::StreamDataComplete {
            source_stream_id,
            destination_stream_id,
            ..
        } => vec![*source_stream_id, *destination_stream_id],
        Message::SimpleNodeIdentInfoRequest { .. } => Vec::new(),
        Message::SimpleNodeIdentInfoReply { payload, .. } => payload.clone(),
        Message::Addressed { payload, .. } => payload.clone(),
        // Rendered via dedicated frame types, not an MTI body.
        Message::Datagram { .. } | Message::StreamDataSend { .. } => Vec::new(),
    }
}

// ----------------------------------------------------------------------
// Frame construction
// ----------------------------------------------------------------------

fn addressed_frames(
    mti: Mti,
    source: Alias,
    destination: Alias,
    body: &[u8],
) -> Result<Vec<CanFrame>> {
    let mut payload = [0u8; 8];
    if body.len() <= ADDRESSED_CHUNK {
        write_prefix(&mut payload, AddressedFlag::Only, destination);
        payload[2..2 + body.len()].copy_from_slice(body);
        return Ok(vec![CanFrame::openlcb_message(
            mti,
            source,
            &payload[..2 + body.len()],
        )?]);
    }

    let chunks: Vec<&[u8]> = body.chunks(ADDRESSED_CHUNK).collect();
    let mut frames = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let flag = if i == 0 {
            AddressedFlag::First
        } else if i == chunks.len() - 1 {
            AddressedFlag::Last
        } else {
            AddressedFlag::Middle
        };
        write_prefix(&mut payload, flag, destination);
        payload[2..2 + chunk.len()].copy_from_slice(chunk);
        frames.push(CanFrame::openlcb_message(
            mti,
            source,
            &payload[..2 + chunk.len()],
        )?);
    }
    Ok(frames)
}

fn write_prefix(payload: &mut [u8; 8], flag: AddressedFlag, destination: Alias) {
    let prefix = (u16::from(flag as u8) << 12) | destination.raw();
    BigEndian::write_u16(&mut payload[..2], prefix);
}

fn datagram_frames(destination: Alias, source: Alias, payload: &[u8]) -> Result<Vec<CanFrame>> {
    if payload.len() > MAX_DATAGRAM_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_DATAGRAM_PAYLOAD,
        }
        .into());
    }
    if payload.len() <= MAX_FRAME_PAYLOAD {
        return Ok(vec![CanFrame::datagram(
            FrameType::DatagramComplete,
            destination,
            source,
            payload,
        )?]);
    }

    let chunks: Vec<&[u8]> = payload.chunks(MAX_FRAME_PAYLOAD).collect();
    let mut frames = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let frame_type = if i == 0 {
            FrameType::DatagramFirst
        } else if i == chunks.len() - 1 {
            FrameType::DatagramFinal
        } else {
            FrameType::DatagramMiddle
        };
        frames.push(CanFrame::datagram(frame_type, destination, source, chunk)?);
    }
    Ok(frames)
}

fn stream_frames(destination: Alias, source: Alias, payload: &[u8]) -> Result<Vec<CanFrame>> {
    if payload.len() <= MAX_FRAME_PAYLOAD {
        return Ok(vec![CanFrame::stream_data(destination, source, payload)?]);
    }
    payload
        .chunks(MAX_FRAME_PAYLOAD)
        .map(|chunk| CanFrame::stream_data(destination, source, chunk))
        .collect()
}

// ----------------------------------------------------------------------
// Body decoding
// ----------------------------------------------------------------------

fn body_node_id(body: &[u8]) -> Option<NodeId> {
    if body.len() < 6 {
        return None;
    }
    let mut bytes = [0u8; 6];
    bytes.copy_from_slice(&body[..6]);
    Some(NodeId::new(bytes))
}

fn body_event_id(body: &[u8]) -> Option<EventId> {
    if body.len() < 8 {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&body[..8]);
    Some(EventId::new(bytes))
}

fn decode_global(mti: Mti, source: NodeId, body: &[u8]) -> Option<Message> {
    let msg = match mti {
        Mti::INITIALIZATION_COMPLETE => Message::InitializationComplete {
            // The payload is authoritative; the alias may not be mapped yet.
            source: body_node_id(body).unwrap_or(source),
        },
        Mti::VERIFY_NODE_ID_GLOBAL => Message::VerifyNodeIdGlobal {
            source,
            target: body_node_id(body),
        },
        Mti::VERIFIED_NODE_ID => Message::VerifiedNodeId {
            source,
            node: body_node_id(body)?,
        },
        Mti::IDENTIFY_CONSUMER => Message::IdentifyConsumer {
            source,
            event: body_event_id(body)?,
        },
        Mti::IDENTIFY_PRODUCER => Message::IdentifyProducer {
            source,
            event: body_event_id(body)?,
        },
        Mti::IDENTIFY_EVENTS_GLOBAL => Message::IdentifyEventsGlobal { source },
        Mti::LEARN_EVENT => Message::LearnEvent {
            source,
            event: body_event_id(body)?,
        },
        Mti::PC_EVENT_REPORT => Message::ProducerConsumerEventReport {
            source,
            event: body_event_id(body)?,
        },
        other => {
            warn!(mti = %other, "dropping global frame with unhandled MTI");
            return None;
        }
    };
    Some(msg)
}

fn decode_addressed(mti: Mti, source: NodeId, destination: NodeId, body: &[u8]) -> Message {
    match mti {
        Mti::VERIFY_NODE_ID_ADDRESSED => Message::VerifyNodeIdAddressed {
            source,
            destination,
            target: body_node_id(body),
        },
        Mti::OPTIONAL_INTERACTION_REJECTED => Message::OptionalInteractionRejected {
            source,
            destination,
            error_code: read_u16_or_zero(body, 0),
            rejected_mti: read_u16_or_zero(body, 2),
        },
        Mti::PROTOCOL_SUPPORT_INQUIRY => Message::ProtocolSupportInquiry {
            source,
            destination,
        },
        Mti::PROTOCOL_SUPPORT_REPLY => {
            let mut bytes = [0u8; 8];
            let n = body.len().min(6);
            bytes[8 - 6..8 - 6 + n].copy_from_slice(&body[..n]);
            Message::ProtocolSupportReply {
                source,
                destination,
                protocols: u64::from_be_bytes(bytes) >> (8 * (6 - n) as u32),
            }
        }
        Mti::IDENTIFY_EVENTS_ADDRESSED => Message::IdentifyEventsAddressed {
            source,
            destination,
        },
        Mti::DATAGRAM_ACKNOWLEDGED => Message::DatagramAcknowledged {
            source,
            destination,
            flags: body.first().copied().unwrap_or(0),
        },
        Mti::DATAGRAM_REJECTED => Message::DatagramRejected {
            source,
            destination,
            error_code: read_u16_or_zero(body, 0),
        },
        Mti::STREAM_INITIATE_REQUEST => Message::StreamInitiateRequest {
            source,
            destination,
            buffer_size: read_u16_or_zero(body, 0),
            source_stream_id: body.get(4).copied().unwrap_or(0),
        },
        Mti::STREAM_INITIATE_REPLY => Message::StreamInitiateReply {
            source,
            destination,
            buffer_size: read_u16_or_zero(body, 0),
            source_stream_id: body.get(4).copied().unwrap_or(0),
            destination_stream_id: body.get(5).copied().unwrap_or(0),
        },
        Mti::STREAM_DATA_PROCEED => Message::StreamDataProceed {
            source,
            destination,
            source_stream_id: body.first().copied().unwrap_or(0),
            destination_stream_id: body.get(1).copied().unwrap_or(0),
        },
        Mti::STREAM_DATA_COMPLETE => Message::StreamDataComplete {
            source,
            destination,
            source_stream_id: body.first().copied().unwrap_or(0),
            destination_stream_id: body.get(1).copied().unwrap_or(0),
        },
        Mti::SIMPLE_NODE_IDENT_INFO_REQUEST => Message::SimpleNodeIdentInfoRequest {
            source,
            destination,
        },
        Mti::SIMPLE_NODE_IDENT_INFO_REPLY => Message::SimpleNodeIdentInfoReply {
            source,
            destination,
            payload: body.to_vec(),
        },
        other => Message::Addressed {
            mti: other,
            source,
            destination,
            payload: body.to_vec(),
        },
    }
}

fn read_u16_or_zero(body: &[u8], offset: usize) -> u16 {
    if body.len() >= offset + 2 {
        BigEndian::read_u16(&body[offset..offset + 2])
    } else {
        0
    }
}
