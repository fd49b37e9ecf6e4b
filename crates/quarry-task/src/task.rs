//! Task objects and the result reduction rules.

use quarry_base::{Cube, Literal, NodeId, Path, TaskResult};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Key of a task: the originator of its formula plus its tree position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub originator: NodeId,
    pub path: Path,
}

impl TaskKey {
    #[must_use]
    pub fn new(originator: NodeId, path: Path) -> Self {
        Self { originator, path }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.path, self.originator)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created but not yet queued.
    New,
    /// Queued or executing locally.
    Work,
    /// Split; waiting for both children to finish.
    WaitChildren,
    /// Re-homed to a remote peer.
    Offloaded,
    /// Finished with a result.
    Done,
}

/// A node of the task tree.
#[derive(Debug)]
pub struct Task {
    pub key: TaskKey,
    pub state: TaskState,
    /// Assumption literals defining this sub-formula. Empty for the root.
    pub cube: Cube,
    pub result: TaskResult,
    /// Parent position, or `None` for a local root (including tasks pushed
    /// from a peer, whose parent lives remotely).
    pub parent: Option<Path>,
    pub left_result: Option<TaskResult>,
    pub right_result: Option<TaskResult>,
    /// Worker currently executing this task.
    pub assigned_worker: Option<usize>,
    /// Peer this task was offloaded to.
    pub assigned_peer: Option<NodeId>,
    /// Peer that pushed this task to us; results are reported back to it.
    pub origin_peer: Option<NodeId>,
    /// Set under queue backpressure to nudge the offload policy.
    pub offloadable: bool,
    /// Cooperative cancel flag, observed by the running engine.
    pub stop: Arc<AtomicBool>,
    /// Satisfying assignment, carried upward with a SAT result.
    pub witness: Option<Vec<Literal>>,
}

impl Task {
    #[must_use]
    pub fn new(key: TaskKey, cube: Cube, parent: Option<Path>) -> Self {
        Self {
            key,
            state: TaskState::New,
            cube,
            result: TaskResult::Unknown,
            parent,
            left_result: None,
            right_result: None,
            assigned_worker: None,
            assigned_peer: None,
            origin_peer: None,
            offloadable: false,
            stop: Arc::new(AtomicBool::new(false)),
            witness: None,
        }
    }

    /// Whether the task holds a frozen SAT/UNSAT verdict.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.state == TaskState::Done && self.result.is_terminal()
    }
}

/// What a pair of child results means for the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// The parent is decided.
    Done(TaskResult),
    /// At least one child has to be retried before the parent can close.
    Wait,
}

/// Reduces two child results.
///
/// SAT wins outright (any satisfying assignment proves the sub-formula SAT);
/// UNSAT needs both children; two aborted children collapse to Unknown; every
/// other combination leaves the parent waiting for a retry.
#[must_use]
pub fn reduce(left: TaskResult, right: TaskResult) -> Reduction {
    use TaskResult::{Aborted, Sat, Unsat};
    match (left, right) {
        (Sat, _) | (_, Sat) => Reduction::Done(Sat),
        (Unsat, Unsat) => Reduction::Done(Unsat),
        (Aborted, Aborted) => Reduction::Done(TaskResult::Unknown),
        _ => Reduction::Wait,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskResult::*;

    #[test]
    fn test_reduction_table() {
        assert_eq!(reduce(Sat, Unsat), Reduction::Done(Sat));
        assert_eq!(reduce(Unsat, Sat), Reduction::Done(Sat));
        assert_eq!(reduce(Sat, Aborted), Reduction::Done(Sat));
        assert_eq!(reduce(Unknown, Sat), Reduction::Done(Sat));
        assert_eq!(reduce(Unsat, Unsat), Reduction::Done(Unsat));
        assert_eq!(reduce(Aborted, Aborted), Reduction::Done(Unknown));
        assert_eq!(reduce(Unsat, Unknown), Reduction::Wait);
        assert_eq!(reduce(Unknown, Unsat), Reduction::Wait);
        assert_eq!(reduce(Unknown, Aborted), Reduction::Wait);
        assert_eq!(reduce(NoSplitsLeft, Unsat), Reduction::Wait);
    }
}
