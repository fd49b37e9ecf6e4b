//! The peer table.

use crate::compute_node::{ComputeNode, Description, NodeStatus};
use quarry_base::NodeId;
use quarry_net::PeerQueues;
use quarry_protocol::RemoteEntry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// All known compute nodes, the local one included.
pub struct NodeRegistry {
    local_id: NodeId,
    queues: Arc<PeerQueues>,
    nodes: RwLock<HashMap<NodeId, Arc<ComputeNode>>>,
}

impl NodeRegistry {
    /// Creates the registry with the local node pre-registered.
    #[must_use]
    pub fn new(local_id: NodeId, local_description: Description, queues: Arc<PeerQueues>) -> Self {
        let mut description = local_description;
        description.local = true;
        let local = Arc::new(ComputeNode::new(local_id, None));
        local.upsert_description(description);
        let mut nodes = HashMap::new();
        nodes.insert(local_id, local);
        Self {
            local_id,
            queues,
            nodes: RwLock::new(nodes),
        }
    }

    #[must_use]
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// The node entry for a peer, created on first observation.
    pub fn get_or_create(&self, peer: NodeId) -> Arc<ComputeNode> {
        if let Some(node) = self.nodes.read().unwrap().get(&peer) {
            return Arc::clone(node);
        }
        let mut nodes = self.nodes.write().unwrap();
        Arc::clone(nodes.entry(peer).or_insert_with(|| {
            Arc::new(ComputeNode::new(
                peer,
                Some(self.queues.get_or_create(peer)),
            ))
        }))
    }

    #[must_use]
    pub fn get(&self, peer: NodeId) -> Option<Arc<ComputeNode>> {
        self.nodes.read().unwrap().get(&peer).cloned()
    }

    #[must_use]
    pub fn contains(&self, peer: NodeId) -> bool {
        self.nodes.read().unwrap().contains_key(&peer)
    }

    /// Installs a peer description (idempotent; later wins).
    pub fn upsert_description(&self, peer: NodeId, description: Description) {
        self.get_or_create(peer).upsert_description(description);
    }

    /// Applies a status snapshot to a peer.
    pub fn apply_status(&self, peer: NodeId, status: NodeStatus) {
        self.get_or_create(peer).apply_status(status);
    }

    /// Removes a departed peer. The local node is never removed.
    pub fn remove(&self, peer: NodeId) {
        if peer == self.local_id {
            return;
        }
        self.nodes.write().unwrap().remove(&peer);
        self.queues.remove(peer);
    }

    /// Ids of all remote peers.
    #[must_use]
    pub fn peers(&self) -> Vec<NodeId> {
        self.nodes
            .read()
            .unwrap()
            .keys()
            .copied()
            .filter(|&id| id != self.local_id)
            .collect()
    }

    /// Snapshot of all remote node entries.
    #[must_use]
    pub fn peer_nodes(&self) -> Vec<Arc<ComputeNode>> {
        self.nodes
            .read()
            .unwrap()
            .iter()
            .filter(|(&id, _)| id != self.local_id)
            .map(|(_, n)| Arc::clone(n))
            .collect()
    }

    /// Fully described remote peers for newcomer discovery.
    #[must_use]
    pub fn known_remotes(&self) -> Vec<RemoteEntry> {
        let mut entries: Vec<RemoteEntry> = self
            .peer_nodes()
            .into_iter()
            .filter_map(|node| {
                let description = node.description()?;
                if description.host.is_empty() {
                    return None;
                }
                Some(RemoteEntry {
                    peer_id: node.id(),
                    tcp_port: description.tcp_port,
                    host: description.host,
                })
            })
            .collect();
        entries.sort_by_key(|e| e.peer_id);
        entries
    }

    /// Records that a peer was heard from.
    pub fn touch(&self, peer: NodeId) {
        if let Some(node) = self.get(peer) {
            node.touch();
        }
    }

    /// Drops peers silent for longer than `timeout`; returns their ids.
    pub fn remove_silent(&self, timeout: std::time::Duration) -> Vec<NodeId> {
        let silent: Vec<NodeId> = self
            .peer_nodes()
            .into_iter()
            .filter(|n| n.silence() > timeout)
            .map(|n| n.id())
            .collect();
        for &peer in &silent {
            tracing::info!(peer, "dropping silent peer");
            self.remove(peer);
        }
        silent
    }

    /// The described remote peer with the lowest projected utilization after
    /// taking one more task.
    #[must_use]
    pub fn peer_by_lowest_utilization(&self) -> Option<(NodeId, f32)> {
        self.peer_nodes()
            .into_iter()
            .filter(|n| n.is_described())
            .map(|n| (n.id(), n.future_utilization(1)))
            .filter(|(_, u)| u.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute_node::{NodeStatus, SolverInstance};
    use std::time::Duration;

    fn registry() -> NodeRegistry {
        let queues = Arc::new(PeerQueues::new(Duration::from_secs(30)));
        let description = Description {
            name: "local".to_string(),
            host: "localhost".to_string(),
            workers: 4,
            udp_port: 1,
            tcp_port: 2,
            daemon: false,
            local: false,
        };
        NodeRegistry::new(100, description, queues)
    }

    fn describe(reg: &NodeRegistry, peer: NodeId, workers: u32, queued: u64) {
        reg.upsert_description(
            peer,
            Description {
                name: format!("peer-{peer}"),
                host: "10.0.0.1".to_string(),
                workers,
                udp_port: 1,
                tcp_port: 2,
                daemon: true,
                local: false,
            },
        );
        let mut status = NodeStatus::default();
        status.epoch = 1;
        status.instances.insert(
            100,
            SolverInstance {
                formula_parsed: true,
                work_queue_size: queued,
            },
        );
        reg.apply_status(peer, status);
    }

    #[test]
    fn test_local_node_present_once() {
        let reg = registry();
        assert!(reg.contains(100));
        assert!(reg.peers().is_empty());
        let local = reg.get(100).unwrap();
        assert!(local.description().unwrap().local);
        // The local entry survives removal attempts.
        reg.remove(100);
        assert!(reg.contains(100));
    }

    #[test]
    fn test_lowest_utilization_pick() {
        let reg = registry();
        describe(&reg, 1, 4, 8); // (8+1)/4 = 2.25
        describe(&reg, 2, 8, 4); // (4+1)/8 = 0.625
        describe(&reg, 3, 2, 1); // (1+1)/2 = 1.0
        let (peer, utilization) = reg.peer_by_lowest_utilization().unwrap();
        assert_eq!(peer, 2);
        assert!((utilization - 0.625).abs() < f32::EPSILON);
    }

    #[test]
    fn test_undescribed_peer_invisible_to_policy() {
        let reg = registry();
        // Known by id only (e.g. gossip), no description yet.
        let _ = reg.get_or_create(7);
        assert!(reg.peer_by_lowest_utilization().is_none());
        assert!(reg.known_remotes().is_empty());
    }

    #[test]
    fn test_known_remotes_lists_described_peers() {
        let reg = registry();
        describe(&reg, 3, 2, 0);
        describe(&reg, 1, 2, 0);
        let remotes = reg.known_remotes();
        assert_eq!(remotes.len(), 2);
        assert_eq!(remotes[0].peer_id, 1);
        assert_eq!(remotes[1].peer_id, 3);
        assert_eq!(remotes[0].host, "10.0.0.1");
    }
}
