//! Protocol message types and their little-endian payload layouts.

use crate::io::{
    get_i32, get_short_string, get_u16, get_u32, get_u64, get_u8, put_short_string,
};
use quarry_base::traits::Wire;
use quarry_base::{Cube, Error, Literal, NodeId, Path, Result, TaskResult};

/// Frame magic, `QUBR` in little-endian byte order.
pub const MAGIC: u32 = 0x5242_5551;

/// Version announced in the handshake; a mismatch closes the connection.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frame flag bits.
pub mod flags {
    /// More continuation frames with the same seq follow.
    pub const CHUNKED: u8 = 0b0000_0001;
    /// The payload is a handshake description.
    pub const HELLO: u8 = 0b0000_0010;
}

/// Message kinds on the wire. The byte values are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    TaskPush = 0x00,
    TaskResult = 0x01,
    Status = 0x02,
    KnownRemotes = 0x03,
    OfflineAnnouncement = 0x04,
    FileBlob = 0x05,
    Ack = 0x06,
    End = 0x07,
}

impl MessageKind {
    /// Decodes a kind byte.
    #[must_use]
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => MessageKind::TaskPush,
            0x01 => MessageKind::TaskResult,
            0x02 => MessageKind::Status,
            0x03 => MessageKind::KnownRemotes,
            0x04 => MessageKind::OfflineAnnouncement,
            0x05 => MessageKind::FileBlob,
            0x06 => MessageKind::Ack,
            0x07 => MessageKind::End,
            _ => return None,
        })
    }

    /// Whether a received message of this kind is acknowledged.
    #[must_use]
    pub fn wants_ack(self) -> bool {
        !matches!(self, MessageKind::Ack | MessageKind::End)
    }
}

/// Handshake description, sent as the first frame of every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: u32,
    pub peer_id: NodeId,
    pub workers: u32,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub name: String,
    pub host: String,
    pub daemon: bool,
}

impl Wire for Hello {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.peer_id.to_le_bytes());
        out.extend_from_slice(&self.workers.to_le_bytes());
        out.extend_from_slice(&self.tcp_port.to_le_bytes());
        out.extend_from_slice(&self.udp_port.to_le_bytes());
        put_short_string(out, &self.name);
        put_short_string(out, &self.host);
        out.push(u8::from(self.daemon));
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            version: get_u32(buf)?,
            peer_id: get_u64(buf)?,
            workers: get_u32(buf)?,
            tcp_port: get_u16(buf)?,
            udp_port: get_u16(buf)?,
            name: get_short_string(buf)?,
            host: get_short_string(buf)?,
            daemon: get_u8(buf)? != 0,
        })
    }
}

/// A task re-homed to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPushMsg {
    pub originator: NodeId,
    pub path: Path,
    /// The formula follows as a FileBlob message (first push to this peer
    /// for this originator).
    pub formula_follows: bool,
    /// The task's assumption set, fully materialized.
    pub cube: Cube,
}

impl Wire for TaskPushMsg {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.originator.to_le_bytes());
        out.extend_from_slice(&self.path.as_raw().to_le_bytes());
        out.push(u8::from(self.formula_follows));
        out.extend_from_slice(&(self.cube.len() as u32).to_le_bytes());
        for lit in &self.cube {
            out.extend_from_slice(&lit.to_le_bytes());
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let originator = get_u64(buf)?;
        let path = Path::from_raw(get_u64(buf)?)?;
        let formula_follows = get_u8(buf)? != 0;
        let count = get_u32(buf)? as usize;
        let mut cube = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let lit: Literal = get_i32(buf)?;
            if lit == 0 {
                return Err(Error::Protocol {
                    peer: None,
                    message: "zero literal in pushed cube".to_string(),
                });
            }
            cube.push(lit);
        }
        Ok(Self {
            originator,
            path,
            formula_follows,
            cube,
        })
    }
}

/// Result of a task that was pushed to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResultMsg {
    pub originator: NodeId,
    pub path: Path,
    pub result: TaskResult,
    /// Satisfying assignment; non-empty only for SAT.
    pub witness: Vec<Literal>,
}

impl Wire for TaskResultMsg {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.originator.to_le_bytes());
        out.extend_from_slice(&self.path.as_raw().to_le_bytes());
        out.push(self.result.as_u8());
        out.extend_from_slice(&(self.witness.len() as u32).to_le_bytes());
        for lit in &self.witness {
            out.extend_from_slice(&lit.to_le_bytes());
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let originator = get_u64(buf)?;
        let path = Path::from_raw(get_u64(buf)?)?;
        let result_code = get_u8(buf)?;
        let result = TaskResult::from_u8(result_code).ok_or_else(|| Error::Protocol {
            peer: None,
            message: format!("unknown task result code {result_code:#x}"),
        })?;
        let count = get_u32(buf)? as usize;
        let mut witness = Vec::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            witness.push(get_i32(buf)?);
        }
        Ok(Self {
            originator,
            path,
            result,
            witness,
        })
    }
}

/// Per-originator workload of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEntry {
    pub originator: NodeId,
    pub work_queue_size: u64,
    pub parsed: bool,
}

/// Advertised workload snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMsg {
    /// Logical timestamp; receivers drop snapshots older than the last one
    /// they applied.
    pub epoch: u64,
    pub entries: Vec<StatusEntry>,
}

impl Wire for StatusMsg {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.epoch.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.originator.to_le_bytes());
            out.extend_from_slice(&entry.work_queue_size.to_le_bytes());
            out.push(u8::from(entry.parsed));
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let epoch = get_u64(buf)?;
        let count = get_u32(buf)? as usize;
        let mut entries = Vec::with_capacity(count.min(1 << 12));
        for _ in 0..count {
            entries.push(StatusEntry {
                originator: get_u64(buf)?,
                work_queue_size: get_u64(buf)?,
                parsed: get_u8(buf)? != 0,
            });
        }
        Ok(Self { epoch, entries })
    }
}

/// A peer known to the sender, for overlay discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub peer_id: NodeId,
    pub tcp_port: u16,
    pub host: String,
}

/// Peers known to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KnownRemotesMsg {
    pub entries: Vec<RemoteEntry>,
}

impl Wire for KnownRemotesMsg {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.peer_id.to_le_bytes());
            out.extend_from_slice(&entry.tcp_port.to_le_bytes());
            put_short_string(out, &entry.host);
        }
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        let count = get_u16(buf)? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(RemoteEntry {
                peer_id: get_u64(buf)?,
                tcp_port: get_u16(buf)?,
                host: get_short_string(buf)?,
            });
        }
        Ok(Self { entries })
    }
}

/// A decoded message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Hello(Hello),
    TaskPush(TaskPushMsg),
    TaskResult(TaskResultMsg),
    Status(StatusMsg),
    KnownRemotes(KnownRemotesMsg),
    /// The named peer is leaving the overlay.
    Offline { peer_id: NodeId },
    FileBlob(Vec<u8>),
    Ack { status: u8 },
    End,
}

impl Payload {
    /// The kind byte this payload travels under.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            // The handshake rides on the Status kind with the HELLO flag.
            Payload::Hello(_) | Payload::Status(_) => MessageKind::Status,
            Payload::TaskPush(_) => MessageKind::TaskPush,
            Payload::TaskResult(_) => MessageKind::TaskResult,
            Payload::KnownRemotes(_) => MessageKind::KnownRemotes,
            Payload::Offline { .. } => MessageKind::OfflineAnnouncement,
            Payload::FileBlob(_) => MessageKind::FileBlob,
            Payload::Ack { .. } => MessageKind::Ack,
            Payload::End => MessageKind::End,
        }
    }

    /// The flag bits this payload needs.
    #[must_use]
    pub fn flags(&self) -> u8 {
        match self {
            Payload::Hello(_) => flags::HELLO,
            _ => 0,
        }
    }

    /// Encodes the payload body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Hello(h) => h.to_bytes(),
            Payload::TaskPush(m) => m.to_bytes(),
            Payload::TaskResult(m) => m.to_bytes(),
            Payload::Status(m) => m.to_bytes(),
            Payload::KnownRemotes(m) => m.to_bytes(),
            Payload::Offline { peer_id } => peer_id.to_le_bytes().to_vec(),
            Payload::End => Vec::new(),
            Payload::FileBlob(bytes) => bytes.clone(),
            Payload::Ack { status } => vec![*status],
        }
    }

    /// Decodes a payload body for a kind and flag set.
    pub fn decode(kind: MessageKind, frame_flags: u8, bytes: &[u8]) -> Result<Self> {
        if frame_flags & flags::HELLO != 0 {
            return Ok(Payload::Hello(Hello::from_bytes(bytes)?));
        }
        Ok(match kind {
            MessageKind::TaskPush => Payload::TaskPush(TaskPushMsg::from_bytes(bytes)?),
            MessageKind::TaskResult => Payload::TaskResult(TaskResultMsg::from_bytes(bytes)?),
            MessageKind::Status => Payload::Status(StatusMsg::from_bytes(bytes)?),
            MessageKind::KnownRemotes => Payload::KnownRemotes(KnownRemotesMsg::from_bytes(bytes)?),
            MessageKind::OfflineAnnouncement => {
                let mut buf = bytes;
                Payload::Offline {
                    peer_id: get_u64(&mut buf)?,
                }
            }
            MessageKind::FileBlob => Payload::FileBlob(bytes.to_vec()),
            MessageKind::Ack => {
                let mut buf = bytes;
                Payload::Ack {
                    status: get_u8(&mut buf)?,
                }
            }
            MessageKind::End => Payload::End,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_bytes_are_fixed() {
        assert_eq!(MessageKind::TaskPush as u8, 0x00);
        assert_eq!(MessageKind::TaskResult as u8, 0x01);
        assert_eq!(MessageKind::Status as u8, 0x02);
        assert_eq!(MessageKind::KnownRemotes as u8, 0x03);
        assert_eq!(MessageKind::OfflineAnnouncement as u8, 0x04);
        assert_eq!(MessageKind::FileBlob as u8, 0x05);
        assert_eq!(MessageKind::Ack as u8, 0x06);
        assert_eq!(MessageKind::End as u8, 0x07);
        assert!(MessageKind::from_u8(0x08).is_none());
    }

    #[test]
    fn test_hello_wire_layout() {
        let hello = Hello {
            version: 1,
            peer_id: 0x0102_0304_0506_0708,
            workers: 4,
            tcp_port: 18001,
            udp_port: 18002,
            name: "n1".to_string(),
            host: "h".to_string(),
            daemon: true,
        };
        let bytes = hello.to_bytes();
        // version
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
        // peer id, little-endian
        assert_eq!(&bytes[4..12], &[8, 7, 6, 5, 4, 3, 2, 1]);
        // workers
        assert_eq!(&bytes[12..16], &[4, 0, 0, 0]);
        // ports
        assert_eq!(&bytes[16..18], &18001u16.to_le_bytes());
        assert_eq!(&bytes[18..20], &18002u16.to_le_bytes());
        // name_len, name
        assert_eq!(bytes[20], 2);
        assert_eq!(&bytes[21..23], b"n1");
        // host_len, host
        assert_eq!(bytes[23], 1);
        assert_eq!(&bytes[24..25], b"h");
        // daemon
        assert_eq!(bytes[25], 1);
        assert_eq!(bytes.len(), 26);

        assert_eq!(Hello::from_bytes(&bytes).unwrap(), hello);
    }

    #[test]
    fn test_task_push_roundtrip() {
        let msg = TaskPushMsg {
            originator: 42,
            path: Path::from_parts(3, 0b101).unwrap(),
            formula_follows: true,
            cube: vec![4, -17, 3],
        };
        let decoded = TaskPushMsg::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_task_push_rejects_zero_literal() {
        let mut msg = TaskPushMsg {
            originator: 1,
            path: Path::root(),
            formula_follows: false,
            cube: vec![1],
        };
        msg.cube = vec![0];
        assert!(TaskPushMsg::from_bytes(&msg.to_bytes()).is_err());
    }

    #[test]
    fn test_task_result_roundtrip() {
        let msg = TaskResultMsg {
            originator: 7,
            path: Path::root().right().unwrap(),
            result: TaskResult::Sat,
            witness: vec![1, -2, 3],
        };
        assert_eq!(TaskResultMsg::from_bytes(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_status_roundtrip() {
        let msg = StatusMsg {
            epoch: 99,
            entries: vec![
                StatusEntry {
                    originator: 1,
                    work_queue_size: 12,
                    parsed: true,
                },
                StatusEntry {
                    originator: 2,
                    work_queue_size: 0,
                    parsed: false,
                },
            ],
        };
        assert_eq!(StatusMsg::from_bytes(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_known_remotes_roundtrip() {
        let msg = KnownRemotesMsg {
            entries: vec![RemoteEntry {
                peer_id: 11,
                tcp_port: 18001,
                host: "10.0.0.3".to_string(),
            }],
        };
        assert_eq!(KnownRemotesMsg::from_bytes(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn test_payload_dispatch() {
        let status = Payload::Status(StatusMsg {
            epoch: 1,
            entries: vec![],
        });
        let decoded = Payload::decode(status.kind(), status.flags(), &status.encode()).unwrap();
        assert_eq!(decoded, status);

        let hello = Payload::Hello(Hello {
            version: PROTOCOL_VERSION,
            peer_id: 3,
            workers: 2,
            tcp_port: 1,
            udp_port: 2,
            name: "x".to_string(),
            host: "y".to_string(),
            daemon: false,
        });
        assert_eq!(hello.kind(), MessageKind::Status);
        assert_eq!(hello.flags(), flags::HELLO);
        let decoded = Payload::decode(hello.kind(), hello.flags(), &hello.encode()).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let msg = StatusMsg {
            epoch: 5,
            entries: vec![StatusEntry {
                originator: 1,
                work_queue_size: 2,
                parsed: true,
            }],
        };
        let bytes = msg.to_bytes();
        assert!(StatusMsg::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
