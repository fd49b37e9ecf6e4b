//! Per-peer state: description, advertised status, utilization.

use quarry_base::NodeId;
use quarry_net::SendQueue;
use quarry_protocol::{Hello, Payload, StatusEntry, StatusMsg};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

/// Static facts about a node, learned from its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub name: String,
    pub host: String,
    pub workers: u32,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub daemon: bool,
    pub local: bool,
}

impl Description {
    /// Builds a description from a handshake, filling an empty host field
    /// with the address the connection came from.
    #[must_use]
    pub fn from_hello(hello: &Hello, observed_host: Option<String>) -> Self {
        let host = if hello.host.is_empty() {
            observed_host.unwrap_or_default()
        } else {
            hello.host.clone()
        };
        Self {
            name: hello.name.clone(),
            host,
            workers: hello.workers,
            udp_port: hello.udp_port,
            tcp_port: hello.tcp_port,
            daemon: hello.daemon,
            local: false,
        }
    }
}

/// Per-originator solver state of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolverInstance {
    pub formula_parsed: bool,
    pub work_queue_size: u64,
}

/// A node's advertised workload snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStatus {
    /// Logical timestamp; stale snapshots are dropped.
    pub epoch: u64,
    pub instances: HashMap<NodeId, SolverInstance>,
}

impl NodeStatus {
    /// Total advertised queue size over all originators.
    #[must_use]
    pub fn work_queue_size(&self) -> u64 {
        self.instances.values().map(|i| i.work_queue_size).sum()
    }

    /// Whether the node has parsed the formula of an originator.
    #[must_use]
    pub fn is_parsed(&self, originator: NodeId) -> bool {
        self.instances
            .get(&originator)
            .is_some_and(|i| i.formula_parsed)
    }

    /// Whether the change from `prev` to `next` is worth a status message:
    /// any parsed-flag flip, an absolute queue-size change above the
    /// threshold, or a relative change over 25 %.
    #[must_use]
    pub fn is_diff_worthwhile(prev: &NodeStatus, next: &NodeStatus, abs_threshold: u64) -> bool {
        let originators: std::collections::HashSet<NodeId> = prev
            .instances
            .keys()
            .chain(next.instances.keys())
            .copied()
            .collect();
        for originator in originators {
            let old = prev.instances.get(&originator).copied().unwrap_or_default();
            let new = next.instances.get(&originator).copied().unwrap_or_default();
            if old.formula_parsed != new.formula_parsed {
                return true;
            }
            let delta = old.work_queue_size.abs_diff(new.work_queue_size);
            if delta > abs_threshold {
                return true;
            }
            if delta > 0 && delta * 4 > old.work_queue_size {
                return true;
            }
        }
        false
    }

    /// Wire form of this snapshot.
    #[must_use]
    pub fn to_msg(&self) -> StatusMsg {
        let mut entries: Vec<StatusEntry> = self
            .instances
            .iter()
            .map(|(&originator, instance)| StatusEntry {
                originator,
                work_queue_size: instance.work_queue_size,
                parsed: instance.formula_parsed,
            })
            .collect();
        entries.sort_by_key(|e| e.originator);
        StatusMsg {
            epoch: self.epoch,
            entries,
        }
    }

    /// Builds a snapshot from a wire message.
    #[must_use]
    pub fn from_msg(msg: &StatusMsg) -> Self {
        let instances = msg
            .entries
            .iter()
            .map(|e| {
                (
                    e.originator,
                    SolverInstance {
                        formula_parsed: e.parsed,
                        work_queue_size: e.work_queue_size,
                    },
                )
            })
            .collect();
        Self {
            epoch: msg.epoch,
            instances,
        }
    }
}

/// One entry of the registry: everything we know about a peer (or about
/// ourselves, for the single local entry).
pub struct ComputeNode {
    id: NodeId,
    description: RwLock<Option<Description>>,
    status: RwLock<NodeStatus>,
    /// What this peer last heard about our own status; gates re-sending.
    remotely_known_local_status: Mutex<Option<NodeStatus>>,
    /// At-most-one in-flight status publish to this peer.
    sending_status: AtomicBool,
    /// Last time the peer was heard from; drives the silence timeout.
    last_seen: Mutex<Instant>,
    queue: Option<Arc<SendQueue>>,
}

impl ComputeNode {
    #[must_use]
    pub fn new(id: NodeId, queue: Option<Arc<SendQueue>>) -> Self {
        Self {
            id,
            description: RwLock::new(None),
            status: RwLock::new(NodeStatus::default()),
            remotely_known_local_status: Mutex::new(None),
            sending_status: AtomicBool::new(false),
            last_seen: Mutex::new(Instant::now()),
            queue,
        }
    }

    /// Records that the peer was heard from.
    pub fn touch(&self) {
        *self.last_seen.lock().unwrap() = Instant::now();
    }

    /// Time since the peer was last heard from.
    #[must_use]
    pub fn silence(&self) -> std::time::Duration {
        self.last_seen.lock().unwrap().elapsed()
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The send queue toward this peer; absent on the local entry.
    #[must_use]
    pub fn queue(&self) -> Option<Arc<SendQueue>> {
        self.queue.clone()
    }

    #[must_use]
    pub fn description(&self) -> Option<Description> {
        self.description.read().unwrap().clone()
    }

    /// Whether the node is fully described and visible to the policy.
    #[must_use]
    pub fn is_described(&self) -> bool {
        self.description.read().unwrap().is_some()
    }

    /// Installs or replaces the description. Idempotent.
    pub fn upsert_description(&self, description: Description) {
        *self.description.write().unwrap() = Some(description);
    }

    /// Applies a status snapshot, ignoring anything older than what we have.
    pub fn apply_status(&self, status: NodeStatus) -> bool {
        let mut current = self.status.write().unwrap();
        if status.epoch < current.epoch {
            tracing::debug!(
                peer = self.id,
                got = status.epoch,
                have = current.epoch,
                "dropped stale status snapshot"
            );
            return false;
        }
        *current = status;
        true
    }

    #[must_use]
    pub fn status(&self) -> NodeStatus {
        self.status.read().unwrap().clone()
    }

    #[must_use]
    pub fn is_parsed(&self, originator: NodeId) -> bool {
        self.status.read().unwrap().is_parsed(originator)
    }

    /// Advertised work per worker. Infinite while the description is
    /// missing, so undescribed nodes never attract work.
    #[must_use]
    pub fn utilization(&self) -> f32 {
        self.future_utilization(0)
    }

    /// Utilization if `extra` more tasks were pushed to this node.
    #[must_use]
    pub fn future_utilization(&self, extra: u64) -> f32 {
        let workers = self
            .description
            .read()
            .unwrap()
            .as_ref()
            .map_or(0, |d| d.workers);
        if workers == 0 {
            return f32::INFINITY;
        }
        let queued = self.status.read().unwrap().work_queue_size();
        ((queued + extra) as f32 / workers as f32).max(0.0)
    }

    /// Publishes our status to this peer if it differs enough from what the
    /// peer already knows. A test-and-set guard keeps publishes to one at a
    /// time per peer.
    pub fn conditionally_send_status(&self, local: &NodeStatus, abs_threshold: u64, force: bool) {
        let Some(queue) = &self.queue else {
            return;
        };
        if self
            .sending_status
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let worthwhile = {
            let known = self.remotely_known_local_status.lock().unwrap();
            force
                || match known.as_ref() {
                    Some(prev) => NodeStatus::is_diff_worthwhile(prev, local, abs_threshold),
                    None => true,
                }
        };
        if worthwhile {
            queue.send(&Payload::Status(local.to_msg()));
            *self.remotely_known_local_status.lock().unwrap() = Some(local.clone());
            tracing::trace!(peer = self.id, epoch = local.epoch, "status published");
        }
        self.sending_status.store(false, Ordering::SeqCst);
    }
}
