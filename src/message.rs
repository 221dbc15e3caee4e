//! OpenLCB message taxonomy.
//!
//! One tagged variant per message kind, each carrying its source node id and
//! whatever the kind adds: a destination for addressed messages, an event id
//! for producer/consumer traffic, opaque bytes for datagrams and streams.
//! `is_addressed` / `carries_event` are derived from the MTI, not from the
//! variant shape.

use crate::types::{EventId, Mti, NodeId};

/// High-level message container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // Node bring-up and identification
    InitializationComplete {
        source: NodeId,
    },
    VerifyNodeIdGlobal {
        source: NodeId,
        /// With a target only that node answers; without, every node does.
        target: Option<NodeId>,
    },
    VerifyNodeIdAddressed {
        source: NodeId,
        destination: NodeId,
        target: Option<NodeId>,
    },
    VerifiedNodeId {
        source: NodeId,
        node: NodeId,
    },
    OptionalInteractionRejected {
        source: NodeId,
        destination: NodeId,
        error_code: u16,
        rejected_mti: u16,
    },

    // Protocol support
    ProtocolSupportInquiry {
        source: NodeId,
        destination: NodeId,
    },
    ProtocolSupportReply {
        source: NodeId,
        destination: NodeId,
        /// Protocol flag bits, 48 wire bits left-aligned in the low 48.
        protocols: u64,
    },

    // Producer/consumer events
    IdentifyConsumer {
        source: NodeId,
        event: EventId,
    },
    IdentifyProducer {
        source: NodeId,
        event: EventId,
    },
    IdentifyEventsGlobal {
        source: NodeId,
    },
    IdentifyEventsAddressed {
        source: NodeId,
        destination: NodeId,
    },
    LearnEvent {
        source: NodeId,
        event: EventId,
    },
    ProducerConsumerEventReport {
        source: NodeId,
        event: EventId,
    },

    // Datagrams
    Datagram {
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },
    DatagramAcknowledged {
        source: NodeId,
        destination: NodeId,
        flags: u8,
    },
    DatagramRejected {
        source: NodeId,
        destination: NodeId,
        error_code: u16,
    },

    // Streams
    StreamInitiateRequest {
        source: NodeId,
        destination: NodeId,
        buffer_size: u16,
        source_stream_id: u8,
    },
    StreamInitiateReply {
        source: NodeId,
        destination: NodeId,
        buffer_size: u16,
        source_stream_id: u8,
        destination_stream_id: u8,
    },
    StreamDataSend {
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },
    StreamDataProceed {
        source: NodeId,
        destination: NodeId,
        source_stream_id: u8,
        destination_stream_id: u8,
    },
    StreamDataComplete {
        source: NodeId,
        destination: NodeId,
        source_stream_id: u8,
        destination_stream_id: u8,
    },

    // Simple node ident info
    SimpleNodeIdentInfoRequest {
        source: NodeId,
        destination: NodeId,
    },
    SimpleNodeIdentInfoReply {
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },

    /// Addressed message with an MTI this stack has no dedicated variant for.
    /// Round-trips the raw body so upper layers can interpret it.
    Addressed {
        mti: Mti,
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },
}

impl Message {
    /// The message type indicator.
    pub fn mti(&self) -> Mti {
        match self {
            Self::InitializationComplete { .. } => Mti::INITIALIZATION_COMPLETE,
            Self::VerifyNodeIdGlobal { .. } => Mti::VERIFY_NODE_ID_GLOBAL,
            Self::VerifyNodeIdAddressed { .. } => Mti::VERIFY_NODE_ID_ADDRESSED,
            Self::VerifiedNodeId { .. } => Mti::VERIFIED_NODE_ID,
            Self::OptionalInteractionRejected { .. } => Mti::OPTIONAL_INTERACTION_REJECTED,
            Self::ProtocolSupportInquiry { .. } => Mti::PROTOCOL_SUPPORT_INQUIRY,
            Self::ProtocolSupportReply { .. } => Mti::PROTOCOL_SUPPORT_REPLY,
            Self::IdentifyConsumer { .. } => Mti::IDENTIFY_CONSUMER,
            Self::IdentifyProducer { .. } => Mti::IDENTIFY_PRODUCER,
            Self::IdentifyEventsGlobal { .. } => Mti::IDENTIFY_EVENTS_GLOBAL,
            Self::IdentifyEventsAddressed { .. } => Mti::IDENTIFY_EVENTS_ADDRESSED,
            Self::LearnEvent { .. } => Mti::LEARN_EVENT,
            Self::ProducerConsumerEventReport { .. } => Mti::PC_EVENT_REPORT,
            Self::Datagram { .. } => Mti::DATAGRAM,
            Self::DatagramAcknowledged { .. } => Mti::DATAGRAM_ACKNOWLEDGED,
            Self::DatagramRejected { .. } => Mti::DATAGRAM_REJECTED,
            Self::StreamInitiateRequest { .. } => Mti::STREAM_INITIATE_REQUEST,
            Self::StreamInitiateReply { .. } => Mti::STREAM_INITIATE_REPLY,
            Self::StreamDataSend { .. } => Mti::STREAM_DATA_SEND,
            Self::StreamDataProceed { .. } => Mti::STREAM_DATA_PROCEED,
            Self::StreamDataComplete { .. } => Mti::STREAM_DATA_COMPLETE,
            Self::SimpleNodeIdentInfoRequest { .. } => Mti::SIMPLE_NODE_IDENT_INFO_REQUEST,
            Self::SimpleNodeIdentInfoReply { .. } => Mti::SIMPLE_NODE_IDENT_INFO_REPLY,
            Self::Addressed { mti, .. } => *mti,
        }
    }

    /// The sending node.
    pub fn source(&self) -> NodeId {
        match self {
            Self::InitializationComplete { source }
            | Self::VerifyNodeIdGlobal { source, .. }
            | Self::VerifyNodeIdAddressed { source, .. }
            | Self::VerifiedNodeId { source, .. }
            | Self::OptionalInteractionRejected { source, .. }
            | Self::ProtocolSupportInquiry { source, .. }
            | Self::ProtocolSupportReply { source, .. }
            | Self::IdentifyConsumer { source, .. }
            | Self::IdentifyProducer { source, .. }
            | Self::IdentifyEventsGlobal { source }
            | Self::IdentifyEventsAddressed { source, .. }
            | Self::LearnEvent { source, .. }
            | Self::ProducerConsumerEventReport { source, .. }
            | Self::Datagram { source, .. }
            | Self::DatagramAcknowledged { source, .. }
            | Self::DatagramRejected { source, .. }
            | Self::StreamInitiateRequest { source, .. }
            | Self::StreamInitiateReply { source, .. }
            | Self::StreamDataSend { source, .. }
            | Self::StreamDataProceed { source, .. }
            | Self::StreamDataComplete { source, .. }
            | Self::SimpleNodeIdentInfoRequest { source, .. }
            | Self::SimpleNodeIdentInfoReply { source, .. }
            | Self::Addressed { source, .. } => *source,
        }
    }

    /// The destination node, for addressed messages.
    pub fn destination(&self) -> Option<NodeId> {
        match self {
            Self::VerifyNodeIdAddressed { destination, .. }
            | Self::OptionalInteractionRejected { destination, .. }
            | Self::ProtocolSupportInquiry { destination, .. }
            | Self::ProtocolSupportReply { destination, .. }
            | Self::IdentifyEventsAddressed { destination, .. }
            | Self::Datagram { destination, .. }
            | Self::DatagramAcknowledged { destination, .. }
            | Self::DatagramRejected { destination, .. }
            | Self::StreamInitiateRequest { destination, .. }
            | Self::StreamInitiateReply { destination, .. }
            | Self::StreamDataSend { destination, .. }
            | Self::StreamDataProceed { destination, .. }
            | Self::StreamDataComplete { destination, .. }
            | Self::SimpleNodeIdentInfoRequest { destination, .. }
            | Self::SimpleNodeIdentInfoReply { destination, .. }
            | Self::Addressed { destination, .. } => Some(*destination),
            _ => None,
        }
    }

    /// The event identifier, for producer/consumer messages.
    pub fn event(&self) -> Option<EventId> {
        match self {
            Self::IdentifyConsumer { event, .. }
            | Self::IdentifyProducer { event, .. }
            | Self::LearnEvent { event, .. }
            | Self::ProducerConsumerEventReport { event, .. } => Some(*event),
            _ => None,
        }
    }

    pub fn is_addressed(&self) -> bool {
        self.mti().is_addressed()
    }

    pub fn carries_event(&self) -> bool {
        self.mti().carries_event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(v: u64) -> NodeId {
        NodeId::from_u64(v)
    }

    #[test]
    fn derived_attributes_follow_mti() {
        let msg = Message::ProducerConsumerEventReport {
            source: node(0x0102_0000_0101),
            event: EventId::from_u64(0x0102_0000_0101_0001),
        };
        assert!(msg.carries_event());
        assert!(!msg.is_addressed());
        assert_eq!(msg.destination(), None);

        let msg = Message::ProtocolSupportInquiry {
            source: node(1),
            destination: node(2),
        };
        assert!(msg.is_addressed());
        assert_eq!(msg.destination(), Some(node(2)));
        assert!(!msg.carries_event());
    }

    #[test]
    fn datagram_is_addressed() {
        let msg = Message::Datagram {
            source: node(1),
            destination: node(2),
            payload: vec![0x20, 0x53],
        };
        assert!(msg.is_addressed());
        assert_eq!(msg.mti(), Mti::DATAGRAM);
    }

    #[test]
    fn generic_addressed_reports_its_mti() {
        let msg = Message::Addressed {
            mti: Mti(0x5E8),
            source: node(1),
            destination: node(2),
            payload: vec![],
        };
        assert_eq!(msg.mti(), Mti(0x5E8));
        assert!(msg.is_addressed());
    }
}
