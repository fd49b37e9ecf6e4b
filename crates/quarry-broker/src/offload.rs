//! Picking peers for task offloading.

use crate::registry::NodeRegistry;
use quarry_base::NodeId;

/// Utilization-gap policy: offload only to peers that are at least ε less
/// loaded than we are, so work does not oscillate between nodes.
#[derive(Debug, Clone, Copy)]
pub struct OffloadPolicy {
    epsilon: f32,
}

impl OffloadPolicy {
    #[must_use]
    pub fn new(epsilon: f32) -> Self {
        Self { epsilon }
    }

    /// The target peer for one more task, given our own utilization.
    ///
    /// Returns the described peer with the lowest projected utilization
    /// after one extra task, provided that projection undercuts
    /// `local_utilization` by at least ε.
    #[must_use]
    pub fn pick_target(&self, registry: &NodeRegistry, local_utilization: f32) -> Option<NodeId> {
        let (peer, projected) = registry.peer_by_lowest_utilization()?;
        if projected <= local_utilization - self.epsilon {
            tracing::trace!(
                peer,
                projected,
                local = local_utilization,
                "offload target selected"
            );
            Some(peer)
        } else {
            None
        }
    }
}
