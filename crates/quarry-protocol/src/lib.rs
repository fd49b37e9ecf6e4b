//! # quarry-protocol
//!
//! The wire surface between quarry nodes: message kinds, little-endian
//! payload layouts and the CRC-checked frame codec.
//!
//! Frame layout:
//! `[magic u32][kind u8][flags u8][seq u32][len u32][payload][crc u32]`,
//! all integers little-endian, CRC-32C over everything before the CRC field.

pub mod codec;
pub mod messages;

pub(crate) mod io;

pub use codec::{chunk_frames, ChunkAssembler, Frame, FrameHeader, HEADER_LEN, MAX_PAYLOAD};
pub use messages::{
    flags, Hello, KnownRemotesMsg, MessageKind, Payload, RemoteEntry, StatusEntry, StatusMsg,
    TaskPushMsg, TaskResultMsg, MAGIC, PROTOCOL_VERSION,
};
