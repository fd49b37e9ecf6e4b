//! Unified error types for quarry.

use crate::types::NodeId;
use thiserror::Error;

/// The main error type for quarry operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Formula could not be parsed. Fatal for the affected root.
    #[error("parse error: {0}")]
    Parse(String),

    /// Malformed frame, unknown kind or version mismatch. Closes the
    /// offending connection; other peers are unaffected.
    #[error("protocol error from peer {peer:?}: {message}")]
    Protocol {
        peer: Option<NodeId>,
        message: String,
    },

    /// Handshake timeout or connection reset; the peer is removed and tasks
    /// offloaded to it are reclaimed.
    #[error("peer {0} unreachable")]
    PeerUnreachable(NodeId),

    /// The engine was terminated before reaching a verdict.
    #[error("engine aborted")]
    EngineAborted,

    /// Attempted a transition on a task that already holds a terminal result.
    #[error("task already done")]
    AlreadyDone,

    /// No task registered under the given (originator, path) key.
    #[error("unknown task: originator {originator}, path {path}")]
    UnknownTask { originator: NodeId, path: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
