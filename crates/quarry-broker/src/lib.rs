//! # quarry-broker
//!
//! The coordination layer of a quarry node: the compute-node registry with
//! utilization-driven status gossip, the offload policy that re-homes queued
//! tasks onto under-utilized peers, and the broker event loop tying the task
//! store to the transport.

pub mod broker;
pub mod compute_node;
pub mod offload;
pub mod registry;

pub use broker::{Broker, Verdict};
pub use compute_node::{ComputeNode, Description, NodeStatus, SolverInstance};
pub use offload::OffloadPolicy;
pub use registry::NodeRegistry;
