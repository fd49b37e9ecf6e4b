//! # quarry-net
//!
//! The transport layer: one reliable, ACK'd send queue per peer, driven by a
//! single-threaded reactor owning every socket and timer. Any thread may
//! enqueue; only the reactor thread performs I/O.

pub mod reactor;
pub mod send_queue;

mod connection;

pub use reactor::{NetEvent, Reactor, ReactorHandle, ReactorRequest};
pub use send_queue::{ConnectionHandle, PeerQueues, SendEntry, SendPayload, SendQueue};
