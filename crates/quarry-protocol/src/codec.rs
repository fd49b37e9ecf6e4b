//! Frame encoding, decoding and chunk reassembly.

use crate::messages::{flags, MessageKind, MAGIC};
use quarry_base::{Error, Result};
use std::collections::HashMap;

/// Fixed frame header size: magic, kind, flags, seq, len.
pub const HEADER_LEN: usize = 14;

/// Payloads above this size are split into chunked frames.
pub const MAX_PAYLOAD: usize = 64 * 1024;

/// Upper bound on a single frame's payload length field; anything larger is
/// a protocol error (a chunked sender never exceeds [`MAX_PAYLOAD`]).
const MAX_FRAME_LEN: u32 = (MAX_PAYLOAD as u32) + 1024;

/// Parsed fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: MessageKind,
    pub flags: u8,
    pub seq: u32,
    pub len: u32,
}

impl FrameHeader {
    /// Parses and validates a header.
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != MAGIC {
            return Err(Error::Protocol {
                peer: None,
                message: format!("bad frame magic {magic:#010x}"),
            });
        }
        let kind = MessageKind::from_u8(bytes[4]).ok_or_else(|| Error::Protocol {
            peer: None,
            message: format!("unknown message kind {:#04x}", bytes[4]),
        })?;
        let frame_flags = bytes[5];
        let seq = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let len = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
        if len > MAX_FRAME_LEN {
            return Err(Error::Protocol {
                peer: None,
                message: format!("frame payload length {len} exceeds limit"),
            });
        }
        Ok(Self {
            kind,
            flags: frame_flags,
            seq,
            len,
        })
    }
}

/// A single frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub flags: u8,
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(kind: MessageKind, frame_flags: u8, seq: u32, payload: Vec<u8>) -> Self {
        Self {
            kind,
            flags: frame_flags,
            seq,
            payload,
        }
    }

    /// Serializes the frame, appending the CRC-32C trailer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + 4);
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(self.kind as u8);
        out.push(self.flags);
        out.extend_from_slice(&self.seq.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        let crc = crc32c::crc32c(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Rebuilds a frame from a parsed header and the remaining bytes
    /// (`payload ++ crc`), verifying the checksum.
    pub fn decode_body(
        header: FrameHeader,
        header_bytes: &[u8; HEADER_LEN],
        body: &[u8],
    ) -> Result<Self> {
        let len = header.len as usize;
        if body.len() != len + 4 {
            return Err(Error::Protocol {
                peer: None,
                message: format!("frame body has {} bytes, expected {}", body.len(), len + 4),
            });
        }
        let (payload, crc_bytes) = body.split_at(len);
        let wire_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut hasher = crc32c::crc32c(header_bytes);
        hasher = crc32c::crc32c_append(hasher, payload);
        if hasher != wire_crc {
            return Err(Error::Protocol {
                peer: None,
                message: format!("frame CRC mismatch: got {wire_crc:#010x}, computed {hasher:#010x}"),
            });
        }
        Ok(Self {
            kind: header.kind,
            flags: header.flags,
            seq: header.seq,
            payload: payload.to_vec(),
        })
    }

    /// Decodes exactly one frame from a byte slice.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + 4 {
            return Err(Error::Protocol {
                peer: None,
                message: "frame shorter than header".to_string(),
            });
        }
        let mut header_bytes = [0u8; HEADER_LEN];
        header_bytes.copy_from_slice(&bytes[..HEADER_LEN]);
        let header = FrameHeader::parse(&header_bytes)?;
        Self::decode_body(header, &header_bytes, &bytes[HEADER_LEN..])
    }
}

/// Splits a payload into frames, flagging all but the last as chunked.
///
/// Every chunk shares the message's seq; a payload within [`MAX_PAYLOAD`]
/// yields exactly one frame.
#[must_use]
pub fn chunk_frames(kind: MessageKind, base_flags: u8, seq: u32, payload: &[u8]) -> Vec<Frame> {
    if payload.len() <= MAX_PAYLOAD {
        return vec![Frame::new(kind, base_flags, seq, payload.to_vec())];
    }
    let mut frames = Vec::with_capacity(payload.len() / MAX_PAYLOAD + 1);
    let mut chunks = payload.chunks(MAX_PAYLOAD).peekable();
    while let Some(chunk) = chunks.next() {
        let more = chunks.peek().is_some();
        let frame_flags = if more {
            base_flags | flags::CHUNKED
        } else {
            base_flags
        };
        frames.push(Frame::new(kind, frame_flags, seq, chunk.to_vec()));
    }
    frames
}

/// Reassembles chunked messages per seq.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    partial: HashMap<u32, Vec<u8>>,
}

impl ChunkAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame. Returns the complete payload once the final frame of
    /// its seq arrives.
    #[must_use]
    pub fn push(&mut self, frame: Frame) -> Option<(u32, Vec<u8>)> {
        if frame.flags & flags::CHUNKED != 0 {
            self.partial
                .entry(frame.seq)
                .or_default()
                .extend_from_slice(&frame.payload);
            return None;
        }
        match self.partial.remove(&frame.seq) {
            Some(mut buf) => {
                buf.extend_from_slice(&frame.payload);
                Some((frame.seq, buf))
            }
            None => Some((frame.seq, frame.payload)),
        }
    }

    /// Drops any partially assembled message for a seq (e.g. on reset).
    pub fn forget(&mut self, seq: u32) {
        self.partial.remove(&seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip_bit_identical() {
        let frame = Frame::new(MessageKind::Status, 0, 7, vec![1, 2, 3, 4, 5]);
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_crc_corruption_detected() {
        let frame = Frame::new(MessageKind::TaskPush, 0, 1, vec![9; 32]);
        let mut bytes = frame.encode();
        let payload_byte = HEADER_LEN + 4;
        bytes[payload_byte] ^= 0xFF;
        assert!(Frame::decode(&bytes).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let frame = Frame::new(MessageKind::End, 0, 0, vec![]);
        let mut bytes = frame.encode();
        bytes[0] ^= 0x01;
        assert!(Frame::decode(&bytes).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let frame = Frame::new(MessageKind::End, 0, 0, vec![]);
        let mut bytes = frame.encode();
        bytes[4] = 0x3A;
        assert!(Frame::decode(&bytes).is_err());
    }

    #[test]
    fn test_chunking_and_reassembly() {
        let payload: Vec<u8> = (0..(MAX_PAYLOAD * 2 + 100)).map(|i| i as u8).collect();
        let frames = chunk_frames(MessageKind::FileBlob, 0, 5, &payload);
        assert_eq!(frames.len(), 3);
        assert!(frames[0].flags & flags::CHUNKED != 0);
        assert!(frames[1].flags & flags::CHUNKED != 0);
        assert_eq!(frames[2].flags & flags::CHUNKED, 0);
        assert!(frames.iter().all(|f| f.seq == 5));
        assert!(frames.iter().all(|f| f.payload.len() <= MAX_PAYLOAD));

        let mut asm = ChunkAssembler::new();
        assert!(asm.push(frames[0].clone()).is_none());
        assert!(asm.push(frames[1].clone()).is_none());
        let (seq, assembled) = asm.push(frames[2].clone()).unwrap();
        assert_eq!(seq, 5);
        assert_eq!(assembled, payload);
    }

    #[test]
    fn test_small_payload_single_frame() {
        let frames = chunk_frames(MessageKind::Status, 0, 1, b"abc");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].flags & flags::CHUNKED, 0);

        let mut asm = ChunkAssembler::new();
        let (_, payload) = asm.push(frames[0].clone()).unwrap();
        assert_eq!(payload, b"abc");
    }
}
