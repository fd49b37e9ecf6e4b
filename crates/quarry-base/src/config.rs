//! Runtime configuration shared by all components.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration of one quarry node.
///
/// Built once by the CLI and handed to every component by construction; there
/// is no process-global configuration state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Human-readable node name, announced in the handshake.
    pub name: String,
    /// Number of worker threads in the runner pool.
    pub workers: usize,
    /// TCP listen port for the message transport.
    pub tcp_port: u16,
    /// UDP listen port for short announcements.
    pub udp_port: u16,
    /// Whether this node runs as a daemon (no local formula, serves peers).
    pub daemon: bool,
    /// Peers to dial at startup.
    pub connect: Vec<SocketAddr>,
    /// Depth of the initial cube tree; 0 lets lookahead drive all splitting.
    pub cube_depth: u8,
    /// Deadline for a single lookahead call during splitting.
    pub initial_split_timeout: Duration,
    /// Interval between heartbeat checks on peer connections.
    pub heartbeat_interval: Duration,
    /// Interval between status gossip rounds.
    pub gossip_interval: Duration,
    /// Time until an unacknowledged message is retransmitted; twice this
    /// without an ACK declares the peer dead.
    pub ack_timeout: Duration,
    /// A peer silent for this long is dropped from the registry.
    pub silence_timeout: Duration,
    /// Grace period for engines to acknowledge cancellation.
    pub cancel_grace: Duration,
    /// Ready-queue soft bound factor K: above `workers * K` entries, splits
    /// mark their right child offloadable.
    pub queue_soft_factor: usize,
    /// Offload trigger factor: queue length above `workers * K_offload`
    /// makes the broker look for a target peer.
    pub offload_factor: usize,
    /// Minimum utilization gap to a peer before offloading.
    pub offload_epsilon: f32,
    /// Absolute per-originator queue-size change that makes a status diff
    /// worth publishing.
    pub status_abs_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "quarry".to_string(),
            workers: available_workers(),
            tcp_port: 18001,
            udp_port: 18001,
            daemon: false,
            connect: Vec::new(),
            cube_depth: 0,
            initial_split_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            gossip_interval: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(30),
            silence_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(1),
            queue_soft_factor: 4,
            offload_factor: 2,
            offload_epsilon: 0.25,
            status_abs_threshold: 4,
        }
    }
}

impl Config {
    /// Ready-queue length above which splits mark children offloadable.
    #[must_use]
    pub fn queue_soft_bound(&self) -> usize {
        self.workers * self.queue_soft_factor
    }

    /// Ready-queue length above which the broker tries to offload.
    #[must_use]
    pub fn offload_trigger(&self) -> usize {
        self.workers * self.offload_factor
    }
}

/// Hardware concurrency, with a conservative fallback.
#[must_use]
pub fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}
