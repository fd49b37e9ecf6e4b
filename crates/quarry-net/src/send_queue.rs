//! Per-peer reliable send queues.
//!
//! Every message gets a per-peer monotonic sequence number at enqueue time
//! and lives in `queued` until the reactor writes it, then in
//! `waiting_for_ack` until the peer acknowledges it. Entries nearing their
//! timeout are re-queued for retransmission with their original seq, so
//! receivers can deduplicate.
//!
//! Lock order: `queued` before `waiting_for_ack`; neither is held across an
//! I/O call.

use quarry_base::NodeId;
use quarry_protocol::{MessageKind, Payload};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

/// What an entry carries.
#[derive(Debug, Clone)]
pub enum SendPayload {
    /// An encoded message body.
    Bytes {
        kind: MessageKind,
        flags: u8,
        body: Arc<Vec<u8>>,
    },
    /// A file streamed as chunked FileBlob frames.
    File { path: PathBuf },
}

/// One queued or in-flight message.
#[derive(Debug, Clone)]
pub struct SendEntry {
    pub seq: u32,
    pub payload: SendPayload,
    pub timeout: Duration,
    /// How many times this entry has been written already.
    pub retries: u32,
}

#[derive(Debug)]
struct SentEntry {
    entry: SendEntry,
    sent_at: Instant,
}

/// Write-side handle of a live connection, owned by the reactor.
///
/// The send queue holds only a weak reference: once the reactor drops the
/// connection, wake-ups and writability short-circuit to "not available".
#[derive(Debug, Default)]
pub struct ConnectionHandle {
    pub writable: AtomicBool,
    pub notify: tokio::sync::Notify,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// The reliable send queue toward one peer.
pub struct SendQueue {
    remote: NodeId,
    queued: Mutex<VecDeque<SendEntry>>,
    waiting_for_ack: Mutex<BTreeMap<u32, SentEntry>>,
    next_seq: AtomicU32,
    conn: Mutex<Weak<ConnectionHandle>>,
    default_timeout: Duration,
}

impl SendQueue {
    #[must_use]
    pub fn new(remote: NodeId, default_timeout: Duration) -> Self {
        Self {
            remote,
            queued: Mutex::new(VecDeque::new()),
            waiting_for_ack: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU32::new(0),
            conn: Mutex::new(Weak::new()),
            default_timeout,
        }
    }

    /// The peer this queue talks to.
    #[must_use]
    pub fn remote(&self) -> NodeId {
        self.remote
    }

    /// Enqueues an encoded payload; returns its sequence number.
    pub fn send(&self, payload: &Payload) -> u32 {
        self.send_with_timeout(payload, self.default_timeout)
    }

    /// Enqueues an encoded payload with a per-message timeout.
    pub fn send_with_timeout(&self, payload: &Payload, timeout: Duration) -> u32 {
        let entry = SendPayload::Bytes {
            kind: payload.kind(),
            flags: payload.flags(),
            body: Arc::new(payload.encode()),
        };
        self.push(entry, timeout)
    }

    /// Enqueues a file for chunked streaming.
    pub fn send_file(&self, path: PathBuf) -> u32 {
        self.push(SendPayload::File { path }, self.default_timeout)
    }

    fn push(&self, payload: SendPayload, timeout: Duration) -> u32 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.queued.lock().unwrap().push_back(SendEntry {
            seq,
            payload,
            timeout,
            retries: 0,
        });
        tracing::trace!(peer = self.remote, seq, "message enqueued");
        self.wake();
        seq
    }

    /// Pokes the reactor-side writer, if a connection is attached.
    pub fn wake(&self) {
        if let Some(handle) = self.conn.lock().unwrap().upgrade() {
            handle.notify.notify_one();
        }
    }

    /// Whether a writable connection is attached.
    #[must_use]
    pub fn available_to_send(&self) -> bool {
        self.conn
            .lock()
            .unwrap()
            .upgrade()
            .is_some_and(|h| h.writable.load(Ordering::SeqCst))
    }

    /// The next entry to write, without removing it.
    #[must_use]
    pub fn front(&self) -> Option<SendEntry> {
        self.queued.lock().unwrap().front().cloned()
    }

    /// Moves the front entry into the in-flight map, stamping the send time.
    pub fn pop_front(&self) {
        let mut queued = self.queued.lock().unwrap();
        if let Some(entry) = queued.pop_front() {
            let mut waiting = self.waiting_for_ack.lock().unwrap();
            waiting.insert(
                entry.seq,
                SentEntry {
                    entry,
                    sent_at: Instant::now(),
                },
            );
        }
    }

    /// Settles an in-flight entry. Unknown seqs are dropped silently, which
    /// makes duplicate ACKs harmless.
    pub fn handle_ack(&self, seq: u32, status: u8) -> bool {
        let removed = self.waiting_for_ack.lock().unwrap().remove(&seq);
        match removed {
            Some(_) => {
                tracing::trace!(peer = self.remote, seq, status, "ack received");
                true
            }
            None => false,
        }
    }

    /// Checks emptiness, re-queueing in-flight entries past half their
    /// timeout for retransmission on the way.
    pub fn empty(&self) -> bool {
        let mut queued = self.queued.lock().unwrap();
        let mut waiting = self.waiting_for_ack.lock().unwrap();
        let now = Instant::now();
        let due: Vec<u32> = waiting
            .iter()
            .filter(|(_, sent)| now.duration_since(sent.sent_at) >= sent.entry.timeout / 2)
            .map(|(&seq, _)| seq)
            .collect();
        for seq in due {
            if let Some(sent) = waiting.remove(&seq) {
                let mut entry = sent.entry;
                entry.retries += 1;
                tracing::debug!(
                    peer = self.remote,
                    seq,
                    retries = entry.retries,
                    "retransmitting unacknowledged message"
                );
                queued.push_back(entry);
            }
        }
        queued.is_empty() && waiting.is_empty()
    }

    /// Whether any in-flight entry exceeded its full timeout; the peer is
    /// then considered unreachable.
    #[must_use]
    pub fn has_expired_entry(&self) -> bool {
        let waiting = self.waiting_for_ack.lock().unwrap();
        let now = Instant::now();
        waiting.values().any(|sent| {
            now.duration_since(sent.sent_at) >= sent.entry.timeout && sent.entry.retries >= 1
        })
    }

    /// Attaches the live connection. Earlier handles are superseded.
    pub fn register_connection(&self, handle: &Arc<ConnectionHandle>) {
        *self.conn.lock().unwrap() = Arc::downgrade(handle);
        handle.notify.notify_one();
    }

    /// Detaches a closing connection: in-flight entries go back to the head
    /// of the queue in seq order. A handle that was already superseded by a
    /// newer connection is ignored.
    pub fn detach(&self, handle: &Arc<ConnectionHandle>) {
        {
            let mut conn = self.conn.lock().unwrap();
            if !Weak::ptr_eq(&conn, &Arc::downgrade(handle)) {
                return;
            }
            *conn = Weak::new();
        }
        handle.writable.store(false, Ordering::SeqCst);
        let mut queued = self.queued.lock().unwrap();
        let mut waiting = self.waiting_for_ack.lock().unwrap();
        let mut inflight: Vec<SentEntry> = std::mem::take(&mut *waiting).into_values().collect();
        while let Some(sent) = inflight.pop() {
            queued.push_front(sent.entry);
        }
        tracing::debug!(peer = self.remote, queued = queued.len(), "connection detached");
    }

    /// Queued + in-flight message count.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.queued.lock().unwrap().len() + self.waiting_for_ack.lock().unwrap().len()
    }

    /// The next sequence number to be assigned.
    #[must_use]
    pub fn next_seq(&self) -> u32 {
        self.next_seq.load(Ordering::SeqCst)
    }
}

/// All per-peer send queues, shared between the reactor and the broker.
pub struct PeerQueues {
    map: RwLock<HashMap<NodeId, Arc<SendQueue>>>,
    default_timeout: Duration,
}

impl PeerQueues {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    /// The queue toward a peer, created on first use.
    pub fn get_or_create(&self, peer: NodeId) -> Arc<SendQueue> {
        if let Some(q) = self.map.read().unwrap().get(&peer) {
            return Arc::clone(q);
        }
        let mut map = self.map.write().unwrap();
        Arc::clone(
            map.entry(peer)
                .or_insert_with(|| Arc::new(SendQueue::new(peer, self.default_timeout))),
        )
    }

    #[must_use]
    pub fn get(&self, peer: NodeId) -> Option<Arc<SendQueue>> {
        self.map.read().unwrap().get(&peer).cloned()
    }

    /// Snapshot of all queues.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<SendQueue>> {
        self.map.read().unwrap().values().cloned().collect()
    }

    /// Drops the queue of a departed peer.
    pub fn remove(&self, peer: NodeId) {
        self.map.write().unwrap().remove(&peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol::StatusMsg;

    fn status_payload(epoch: u64) -> Payload {
        Payload::Status(StatusMsg {
            epoch,
            entries: vec![],
        })
    }

    #[test]
    fn test_seq_assignment_is_monotonic() {
        let q = SendQueue::new(1, Duration::from_secs(30));
        let a = q.send(&status_payload(0));
        let b = q.send(&status_payload(1));
        let c = q.send(&status_payload(2));
        assert_eq!((a, b, c), (0, 1, 2));
        assert_eq!(q.next_seq(), 3);
    }

    #[test]
    fn test_ack_settles_inflight_entry() {
        let q = SendQueue::new(1, Duration::from_secs(30));
        let seq = q.send(&status_payload(0));
        assert!(!q.empty());
        q.pop_front();
        assert!(q.front().is_none());

        assert!(q.handle_ack(seq, 0));
        assert!(q.empty());
        // Duplicate ACKs are dropped silently.
        assert!(!q.handle_ack(seq, 0));
    }

    #[test]
    fn test_retransmission_keeps_seq() {
        let q = SendQueue::new(1, Duration::from_millis(20));
        let seq = q.send(&status_payload(0));
        q.pop_front();
        std::thread::sleep(Duration::from_millis(15));
        // Past half the timeout: empty() must re-queue the entry.
        assert!(!q.empty());
        let entry = q.front().expect("entry re-queued for retransmission");
        assert_eq!(entry.seq, seq);
    }

    #[test]
    fn test_expiry_detection() {
        let q = SendQueue::new(1, Duration::from_millis(10));
        let _ = q.send(&status_payload(0));
        q.pop_front();
        assert!(!q.has_expired_entry());
        std::thread::sleep(Duration::from_millis(12));
        // First full timeout: retransmit, not yet dead.
        let _ = q.empty();
        q.pop_front();
        std::thread::sleep(Duration::from_millis(12));
        assert!(q.has_expired_entry());
    }

    #[test]
    fn test_detach_requeues_inflight_in_order() {
        let q = SendQueue::new(1, Duration::from_secs(30));
        let handle = Arc::new(ConnectionHandle::new());
        q.register_connection(&handle);
        handle.writable.store(true, Ordering::SeqCst);
        assert!(q.available_to_send());

        let s0 = q.send(&status_payload(0));
        let s1 = q.send(&status_payload(1));
        q.pop_front();
        q.pop_front();
        let s2 = q.send(&status_payload(2));

        q.detach(&handle);
        assert!(!q.available_to_send());

        // In-flight entries return to the head, original order preserved.
        let mut seqs = Vec::new();
        while let Some(e) = q.front() {
            seqs.push(e.seq);
            q.queued.lock().unwrap().pop_front();
        }
        assert_eq!(seqs, vec![s0, s1, s2]);
    }

    #[test]
    fn test_stale_handle_does_not_detach_new_connection() {
        let q = SendQueue::new(1, Duration::from_secs(30));
        let old = Arc::new(ConnectionHandle::new());
        q.register_connection(&old);
        let new = Arc::new(ConnectionHandle::new());
        new.writable.store(true, Ordering::SeqCst);
        q.register_connection(&new);

        q.detach(&old);
        assert!(q.available_to_send());
    }

    #[test]
    fn test_peer_queue_reuse() {
        let queues = PeerQueues::new(Duration::from_secs(30));
        let a = queues.get_or_create(9);
        let b = queues.get_or_create(9);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(queues.all().len(), 1);
        queues.remove(9);
        assert!(queues.get(9).is_none());
    }
}
