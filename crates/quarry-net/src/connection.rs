//! Per-connection protocol driver: handshake, frame I/O, ACKs.
//!
//! State machine: Connecting → Handshaking → Established → Draining →
//! Closed. The handshake is a HELLO-flagged frame in each direction; after
//! that a read loop and a write loop run concurrently on the reactor thread
//! until either side fails, ends, or the reactor shuts down.

use crate::reactor::{NetEvent, ReactorShared};
use crate::send_queue::{ConnectionHandle, SendEntry, SendPayload, SendQueue};
use quarry_base::traits::Wire;
use quarry_base::{Error, NodeId, Result};
use quarry_protocol::{
    chunk_frames, flags, ChunkAssembler, Frame, FrameHeader, Hello, MessageKind, Payload,
    HEADER_LEN, MAX_PAYLOAD, PROTOCOL_VERSION,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// How often the writer checks for due retransmissions and dead peers.
const RETRANSMIT_TICK: Duration = Duration::from_secs(1);

pub(crate) async fn run_connection(stream: TcpStream, initiated: bool, shared: Rc<ReactorShared>) {
    let addr = stream.peer_addr().ok();
    if let Err(e) = drive(stream, initiated, addr, &shared).await {
        tracing::debug!(?addr, initiated, error = %e, "connection closed with error");
    }
}

async fn drive(
    stream: TcpStream,
    initiated: bool,
    addr: Option<SocketAddr>,
    shared: &Rc<ReactorShared>,
) -> Result<()> {
    tracing::debug!(?addr, initiated, "connection handshaking");
    let (mut rd, mut wr) = stream.into_split();

    // Handshaking: each side leads with its description.
    let hello_frame = Frame::new(
        MessageKind::Status,
        flags::HELLO,
        0,
        shared.hello.to_bytes(),
    );
    wr.write_all(&hello_frame.encode()).await?;
    wr.flush().await?;

    let first = read_frame(&mut rd).await?;
    if first.flags & flags::HELLO == 0 {
        return Err(Error::Protocol {
            peer: None,
            message: "first frame is not a handshake".to_string(),
        });
    }
    let peer_hello = Hello::from_bytes(&first.payload)?;
    if peer_hello.version != PROTOCOL_VERSION {
        return Err(Error::Protocol {
            peer: Some(peer_hello.peer_id),
            message: format!(
                "version mismatch: peer speaks {}, we speak {PROTOCOL_VERSION}",
                peer_hello.version
            ),
        });
    }
    let peer = peer_hello.peer_id;
    if peer == shared.hello.peer_id {
        tracing::debug!("dropped connection to self");
        return Ok(());
    }

    // Established.
    let queue = shared.queues.get_or_create(peer);
    let handle = Arc::new(ConnectionHandle::new());
    handle.writable.store(true, Ordering::SeqCst);
    queue.register_connection(&handle);
    tracing::info!(peer, ?addr, name = %peer_hello.name, "connection established");
    let _ = shared.events.send(NetEvent::PeerConnected {
        hello: peer_hello,
        addr,
    });

    let (ack_tx, mut ack_rx) = tokio::sync::mpsc::unbounded_channel::<u32>();
    let result = tokio::select! {
        r = read_loop(&mut rd, peer, &queue, shared, &ack_tx) => r,
        w = write_loop(&mut wr, peer, &queue, &handle, shared, &mut ack_rx) => w,
    };

    // Closed: in-flight messages go back to the queue head for the next
    // connection; the broker decides whether the peer is gone for good.
    queue.detach(&handle);
    let _ = shared.events.send(NetEvent::PeerDisconnected { peer });
    tracing::info!(peer, ?addr, "connection closed");
    result
}

async fn read_frame(rd: &mut OwnedReadHalf) -> Result<Frame> {
    let mut header_bytes = [0u8; HEADER_LEN];
    rd.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::parse(&header_bytes)?;
    let mut body = vec![0u8; header.len as usize + 4];
    rd.read_exact(&mut body).await?;
    Frame::decode_body(header, &header_bytes, &body)
}

async fn read_loop(
    rd: &mut OwnedReadHalf,
    peer: NodeId,
    queue: &Arc<SendQueue>,
    shared: &Rc<ReactorShared>,
    ack_tx: &tokio::sync::mpsc::UnboundedSender<u32>,
) -> Result<()> {
    let mut assembler = ChunkAssembler::new();
    let mut delivered: HashSet<u32> = HashSet::new();
    loop {
        let frame = read_frame(rd).await?;
        match frame.kind {
            MessageKind::Ack => {
                let status = frame.payload.first().copied().unwrap_or(0);
                queue.handle_ack(frame.seq, status);
                continue;
            }
            MessageKind::End => {
                tracing::debug!(peer, "peer is draining");
                return Ok(());
            }
            _ => {}
        }
        if frame.flags & flags::HELLO != 0 {
            // Duplicate handshake after establishment; ignore.
            continue;
        }

        let kind = frame.kind;
        let frame_flags = frame.flags & !flags::CHUNKED;
        let Some((seq, bytes)) = assembler.push(frame) else {
            continue;
        };
        if !delivered.insert(seq) {
            // A retransmission of something we already handled: the ACK was
            // lost, so acknowledge again but do not deliver twice.
            if kind.wants_ack() {
                let _ = ack_tx.send(seq);
            }
            continue;
        }
        let payload = Payload::decode(kind, frame_flags, &bytes).map_err(|e| match e {
            Error::Protocol { message, .. } => Error::Protocol {
                peer: Some(peer),
                message,
            },
            other => other,
        })?;
        if kind.wants_ack() {
            let _ = ack_tx.send(seq);
        }
        let _ = shared.events.send(NetEvent::Message { peer, seq, payload });
    }
}

async fn write_loop(
    wr: &mut OwnedWriteHalf,
    peer: NodeId,
    queue: &Arc<SendQueue>,
    handle: &Arc<ConnectionHandle>,
    shared: &Rc<ReactorShared>,
    ack_rx: &mut tokio::sync::mpsc::UnboundedReceiver<u32>,
) -> Result<()> {
    let mut shutdown = shared.shutdown.clone();
    let mut tick = tokio::time::interval(RETRANSMIT_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        while let Some(entry) = queue.front() {
            write_entry(wr, &entry).await?;
            queue.pop_front();
        }
        tokio::select! {
            _ = handle.notify.notified() => {}
            Some(seq) = ack_rx.recv() => {
                write_ack(wr, seq).await?;
                while let Ok(seq) = ack_rx.try_recv() {
                    write_ack(wr, seq).await?;
                }
                wr.flush().await?;
            }
            _ = tick.tick() => {
                // Moves entries past half their timeout back into the queue.
                let _ = queue.empty();
                if queue.has_expired_entry() {
                    return Err(Error::PeerUnreachable(peer));
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    // Draining: flush an End frame and stop accepting sends.
                    handle.writable.store(false, Ordering::SeqCst);
                    let end = Frame::new(MessageKind::End, 0, 0, Vec::new());
                    let _ = wr.write_all(&end.encode()).await;
                    let _ = wr.flush().await;
                    tracing::debug!(peer, "connection draining");
                    return Ok(());
                }
            }
        }
    }
}

async fn write_ack(wr: &mut OwnedWriteHalf, seq: u32) -> Result<()> {
    let ack = Frame::new(MessageKind::Ack, 0, seq, vec![0]);
    wr.write_all(&ack.encode()).await?;
    Ok(())
}

async fn write_entry(wr: &mut OwnedWriteHalf, entry: &SendEntry) -> Result<()> {
    match &entry.payload {
        SendPayload::Bytes { kind, flags, body } => {
            for frame in chunk_frames(*kind, *flags, entry.seq, body) {
                wr.write_all(&frame.encode()).await?;
            }
        }
        SendPayload::File { path } => {
            stream_file(wr, entry.seq, path).await?;
        }
    }
    wr.flush().await?;
    Ok(())
}

/// Streams a file as chunked FileBlob frames sharing one seq.
async fn stream_file(wr: &mut OwnedWriteHalf, seq: u32, path: &FsPath) -> Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut remaining = file.metadata().await?.len();
    if remaining == 0 {
        let frame = Frame::new(MessageKind::FileBlob, 0, seq, Vec::new());
        wr.write_all(&frame.encode()).await?;
        return Ok(());
    }
    let mut buf = vec![0u8; MAX_PAYLOAD];
    while remaining > 0 {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file {} shrank while streaming", path.display()),
            )));
        }
        remaining = remaining.saturating_sub(n as u64);
        let frame_flags = if remaining > 0 { flags::CHUNKED } else { 0 };
        let frame = Frame::new(MessageKind::FileBlob, frame_flags, seq, buf[..n].to_vec());
        wr.write_all(&frame.encode()).await?;
    }
    Ok(())
}
