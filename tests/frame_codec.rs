//! Boundary and edge case tests for the frame layer.
//!
//! Covers:
//! - GridConnect round-trips, including empty payloads
//! - Addressed-message split boundaries (6 vs 7 body bytes)
//! - Datagram split boundaries (8 vs 9 payload bytes)
//! - Large multi-frame payloads
//! - Malformed GridConnect input

use std::sync::Arc;

use openlcb::alias::AliasMap;
use openlcb::builder::MessageBuilder;
use openlcb::frame::{gridconnect, AddressedFlag, CanFrame};
use openlcb::message::Message;
use openlcb::types::{Alias, EventId, Mti, NodeId};

fn alias(raw: u16) -> Alias {
    Alias::new(raw).unwrap()
}

fn seeded_map() -> Arc<AliasMap> {
    let map = Arc::new(AliasMap::new());
    map.insert(alias(0x333), NodeId::from_u64(0x0102_0000_0101));
    map.insert(alias(0x444), NodeId::from_u64(0x0102_0000_0202));
    map
}

// ============================================================================
// GridConnect Round-Trips
// ============================================================================

#[test]
fn gridconnect_round_trip_empty_payload() {
    let input = ":X19490333N;";
    let frames = gridconnect::parse(input).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(gridconnect::format(&frames[0]), input);
}

#[test]
fn gridconnect_round_trip_all_payload_lengths() {
    let source = alias(0x5AB);
    for len in 0..=8 {
        let payload: Vec<u8> = (0..len as u8).collect();
        let frame =
            CanFrame::openlcb_message(Mti::PC_EVENT_REPORT, source, &payload).unwrap();
        let rendered = gridconnect::format(&frame);
        let parsed = gridconnect::parse(&rendered).unwrap();
        assert_eq!(parsed, vec![frame], "length {len}");
    }
}

#[test]
fn gridconnect_parse_is_case_insensitive_but_emits_upper() {
    let frames = gridconnect::parse(":x19170444n010200000202;").unwrap();
    assert_eq!(gridconnect::format(&frames[0]), ":X19170444N010200000202;");
}

#[test]
fn gridconnect_concatenated_frames_without_separator() {
    let frames = gridconnect::parse(":X19490333N;:X19490444N;:X19490555N;").unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(
        frames.iter().map(CanFrame::source_alias).collect::<Vec<_>>(),
        vec![0x333, 0x444, 0x555]
    );
}

#[test]
fn gridconnect_malformed_input_rejects_everything() {
    for input in [
        ":X19490333",                      // unterminated
        ":S19490333N;",                    // wrong frame letter
        ":X1949033N;",                     // short header
        ":X19490333N0102030405060708FF;",  // nine payload bytes
        ":X19490333N; :Xoops;",            // valid then garbage
    ] {
        assert!(
            gridconnect::parse(input).is_err(),
            "input {input:?} should be rejected"
        );
    }
}

// ============================================================================
// Addressed-Message Split Boundaries
// ============================================================================

#[test]
fn addressed_six_byte_body_is_single_frame() {
    let builder = MessageBuilder::new(seeded_map());
    let frames = builder
        .process_message(&Message::SimpleNodeIdentInfoReply {
            source: NodeId::from_u64(0x0102_0000_0101),
            destination: NodeId::from_u64(0x0102_0000_0202),
            payload: vec![1, 2, 3, 4, 5, 6],
        })
        .unwrap();
    assert_eq!(frames.len(), 1);
    let (flag, _) = frames[0].addressed_prefix().unwrap();
    assert_eq!(flag, AddressedFlag::Only);
}

#[test]
fn addressed_seven_byte_body_splits_in_two() {
    let builder = MessageBuilder::new(seeded_map());
    let frames = builder
        .process_message(&Message::SimpleNodeIdentInfoReply {
            source: NodeId::from_u64(0x0102_0000_0101),
            destination: NodeId::from_u64(0x0102_0000_0202),
            payload: vec![1, 2, 3, 4, 5, 6, 7],
        })
        .unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(
        frames[0].addressed_prefix().unwrap().0,
        AddressedFlag::First
    );
    assert_eq!(frames[1].addressed_prefix().unwrap().0, AddressedFlag::Last);
    assert_eq!(frames[1].data()[2..], [7]);
}

#[test]
fn addressed_twelve_byte_body_matches_expected_frames() {
    let builder = MessageBuilder::new(seeded_map());
    let frames = builder
        .process_message(&Message::SimpleNodeIdentInfoReply {
            source: NodeId::from_u64(0x0102_0000_0101),
            destination: NodeId::from_u64(0x0102_0000_0202),
            payload: (0x00..=0x0B).collect(),
        })
        .unwrap();
    let rendered = gridconnect::format_all(frames.iter());
    assert_eq!(
        rendered,
        ":X19A08333N1444000102030405;:X19A08333N2444060708090A0B;"
    );
}

#[test]
fn addressed_large_body_reassembles_byte_for_byte() {
    let map = seeded_map();
    let builder = MessageBuilder::new(map.clone());
    let mut decoder = MessageBuilder::new(map);

    let payload: Vec<u8> = (0..=255u8).take(100).collect();
    let original = Message::SimpleNodeIdentInfoReply {
        source: NodeId::from_u64(0x0102_0000_0101),
        destination: NodeId::from_u64(0x0102_0000_0202),
        payload,
    };
    let frames = builder.process_message(&original).unwrap();
    assert_eq!(frames.len(), 17); // 16 * 6 + 4

    let mut middle_count = 0;
    for frame in &frames[1..frames.len() - 1] {
        assert_eq!(
            frame.addressed_prefix().unwrap().0,
            AddressedFlag::Middle
        );
        middle_count += 1;
    }
    assert_eq!(middle_count, 15);

    let mut messages = Vec::new();
    for frame in &frames {
        if let Some(ms) = decoder.process_frame(frame) {
            messages.extend(ms);
        }
    }
    assert_eq!(messages, vec![original]);
}

// ============================================================================
// Datagram Boundaries
// ============================================================================

#[test]
fn datagram_eight_bytes_single_frame_nine_bytes_two() {
    let builder = MessageBuilder::new(seeded_map());
    let dg = |n: usize| Message::Datagram {
        source: NodeId::from_u64(0x0102_0000_0101),
        destination: NodeId::from_u64(0x0102_0000_0202),
        payload: vec![0x20; n],
    };

    assert_eq!(builder.process_message(&dg(0)).unwrap().len(), 1);
    assert_eq!(builder.process_message(&dg(8)).unwrap().len(), 1);
    assert_eq!(builder.process_message(&dg(9)).unwrap().len(), 2);
    assert_eq!(builder.process_message(&dg(72)).unwrap().len(), 9);
    assert!(builder.process_message(&dg(73)).is_err());
}

#[test]
fn datagram_round_trip_through_gridconnect() {
    let map = seeded_map();
    let builder = MessageBuilder::new(map.clone());
    let mut decoder = MessageBuilder::new(map);

    let original = Message::Datagram {
        source: NodeId::from_u64(0x0102_0000_0101),
        destination: NodeId::from_u64(0x0102_0000_0202),
        payload: (0..40).collect(),
    };
    let frames = builder.process_message(&original).unwrap();
    let wire = gridconnect::format_all(frames.iter());
    let parsed = gridconnect::parse(&wire).unwrap();
    assert_eq!(parsed, frames);

    let mut messages = Vec::new();
    for frame in &parsed {
        if let Some(ms) = decoder.process_frame(frame) {
            messages.extend(ms);
        }
    }
    assert_eq!(messages, vec![original]);
}

// ============================================================================
// Event Messages
// ============================================================================

#[test]
fn event_report_round_trip() {
    let map = seeded_map();
    let builder = MessageBuilder::new(map.clone());
    let mut decoder = MessageBuilder::new(map);

    let original = Message::ProducerConsumerEventReport {
        source: NodeId::from_u64(0x0102_0000_0101),
        event: EventId::from_u64(0x0102_0000_0101_ABCD),
    };
    let frames = builder.process_message(&original).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].len(), 8);
    assert_eq!(
        decoder.process_frame(&frames[0]).unwrap(),
        vec![original]
    );
}

#[test]
fn event_frame_with_short_payload_is_dropped() {
    let mut decoder = MessageBuilder::new(seeded_map());
    let frames = gridconnect::parse(":X195B4333N0102;").unwrap();
    assert!(decoder.process_frame(&frames[0]).is_none());
}
