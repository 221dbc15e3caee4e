//! GridConnect ASCII envelope for CAN frames.
//!
//! One frame renders as `:X` + 8 uppercase hex header digits + `N` + two hex
//! digits per payload byte + `;`. Parsing accepts lower-case hex and
//! whitespace between frames, but is strict about the `:X…N…;` skeleton.

use std::fmt::Write as _;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::{Error, ProtocolError, Result};

use super::CanFrame;

/// Render one frame in GridConnect form.
pub fn format(frame: &CanFrame) -> String {
    let mut out = String::with_capacity(12 + frame.len() * 2);
    let _ = write!(out, ":X{:08X}N", frame.header());
    for byte in frame.data() {
        let _ = write!(out, "{byte:02X}");
    }
    out.push(';');
    out
}

/// Render a sequence of frames back to back.
pub fn format_all<'a, I>(frames: I) -> String
where
    I: IntoIterator<Item = &'a CanFrame>,
{
    frames.into_iter().map(format).collect()
}

/// Parse every frame in `input`.
///
/// Inter-frame whitespace is ignored. Any malformed frame rejects the whole
/// input; callers on the receive path log and drop.
pub fn parse(input: &str) -> Result<Vec<CanFrame>> {
    let bytes = input.as_bytes();
    let mut frames = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos].is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        match parse_one(&bytes[pos..]) {
            ParseOne::Frame { frame, consumed } => {
                frames.push(frame);
                pos += consumed;
            }
            ParseOne::Incomplete | ParseOne::Malformed { .. } => {
                return Err(ProtocolError::MalformedGridConnect { offset: pos }.into());
            }
        }
    }

    Ok(frames)
}

enum ParseOne {
    Frame { frame: CanFrame, consumed: usize },
    /// The buffer ends before the frame does; more bytes may complete it.
    Incomplete,
    /// The skeleton is violated at `offset` bytes into the buffer.
    Malformed { offset: usize },
}

fn hex_value(byte: u8) -> Option<u32> {
    (byte as char).to_digit(16)
}

/// Parse a single frame from the start of `buf` (which must begin at a
/// candidate `:`).
fn parse_one(buf: &[u8]) -> ParseOne {
    debug_assert!(!buf.is_empty());
    if buf[0] != b':' {
        return ParseOne::Malformed { offset: 0 };
    }
    if buf.len() < 2 {
        return ParseOne::Incomplete;
    }
    if !buf[1].eq_ignore_ascii_case(&b'X') {
        return ParseOne::Malformed { offset: 1 };
    }

    // 8 hex digits of header.
    let mut header: u32 = 0;
    for i in 0..8 {
        let pos = 2 + i;
        match buf.get(pos) {
            None => return ParseOne::Incomplete,
            Some(&b) => match hex_value(b) {
                Some(v) => header = (header << 4) | v,
                None => return ParseOne::Malformed { offset: pos },
            },
        }
    }

    match buf.get(10) {
        None => return ParseOne::Incomplete,
        Some(b) if b.eq_ignore_ascii_case(&b'N') => {}
        Some(_) => return ParseOne::Malformed { offset: 10 },
    }

    // Payload hex pairs up to the terminating ';'.
    let mut payload = [0u8; 8];
    let mut len = 0usize;
    let mut pos = 11;
    loop {
        match buf.get(pos) {
            None => return ParseOne::Incomplete,
            Some(b';') => {
                pos += 1;
                break;
            }
            Some(&hi) => {
                let Some(hi) = hex_value(hi) else {
                    return ParseOne::Malformed { offset: pos };
                };
                let Some(&lo) = buf.get(pos + 1) else {
                    return ParseOne::Incomplete;
                };
                let Some(lo) = hex_value(lo) else {
                    return ParseOne::Malformed { offset: pos + 1 };
                };
                if len == payload.len() {
                    return ParseOne::Malformed { offset: pos };
                }
                payload[len] = ((hi << 4) | lo) as u8;
                len += 1;
                pos += 2;
            }
        }
    }

    match CanFrame::new(header, &payload[..len]) {
        Ok(frame) => ParseOne::Frame { frame, consumed: pos },
        Err(_) => ParseOne::Malformed { offset: 0 },
    }
}

/// Incremental GridConnect codec for byte tethers.
///
/// Unlike [`parse`], the decoder is resilient: a malformed frame is skipped
/// with a diagnostic and decoding resumes at the next `:`, since a serial
/// link keeps delivering traffic after line noise.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridConnectCodec;

impl GridConnectCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for GridConnectCodec {
    type Item = CanFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            // Skip inter-frame whitespace.
            while src.first().is_some_and(u8::is_ascii_whitespace) {
                src.advance(1);
            }
            let Some(&first) = src.first() else {
                return Ok(None);
            };

            if first != b':' {
                let skip = src
                    .iter()
                    .position(|&b| b == b':')
                    .unwrap_or(src.len());
                warn!(skipped = skip, "discarding non-GridConnect bytes");
                src.advance(skip);
                continue;
            }

            match parse_one(src) {
                ParseOne::Frame { frame, consumed } => {
                    src.advance(consumed);
                    return Ok(Some(frame));
                }
                ParseOne::Incomplete => return Ok(None),
                ParseOne::Malformed { offset } => {
                    // Resume at the next ':' (the offending byte itself may
                    // start the next frame). `offset` is always >= 1 here, so
                    // the scan makes progress.
                    let skip = src[offset..]
                        .iter()
                        .position(|&b| b == b':')
                        .map_or(src.len(), |p| offset + p);
                    warn!(skipped = skip, "discarding malformed GridConnect frame");
                    src.advance(skip);
                }
            }
        }
    }
}

impl Encoder<CanFrame> for GridConnectCodec {
    type Error = Error;

    fn encode(&mut self, item: CanFrame, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(format(&item).as_bytes());
        Ok(())
    }
}
