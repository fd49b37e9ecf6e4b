//! Shared scalar types.

/// Identifier of a compute node. Also used as the originator id of a formula.
pub type NodeId = u64;

/// A signed DIMACS literal. Never zero.
pub type Literal = i32;

/// A conjunction of literals applied as assumptions; defines a sub-formula.
pub type Cube = Vec<Literal>;

/// Result state of a task in the task tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskResult {
    /// Not yet decided.
    Unknown,
    /// A satisfying assignment was found.
    Sat,
    /// The sub-formula is unsatisfiable.
    Unsat,
    /// Execution was cancelled before a verdict.
    Aborted,
    /// The lookahead could not produce a further split.
    NoSplitsLeft,
}

impl TaskResult {
    /// SAT and UNSAT freeze a task; everything else leaves it retryable.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskResult::Sat | TaskResult::Unsat)
    }

    /// Wire code of this result.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            TaskResult::Unknown => 0,
            TaskResult::Sat => 1,
            TaskResult::Unsat => 2,
            TaskResult::Aborted => 3,
            TaskResult::NoSplitsLeft => 4,
        }
    }

    /// Decodes a wire code.
    #[must_use]
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => TaskResult::Unknown,
            1 => TaskResult::Sat,
            2 => TaskResult::Unsat,
            3 => TaskResult::Aborted,
            4 => TaskResult::NoSplitsLeft,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TaskResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskResult::Unknown => "UNKNOWN",
            TaskResult::Sat => "SAT",
            TaskResult::Unsat => "UNSAT",
            TaskResult::Aborted => "ABORTED",
            TaskResult::NoSplitsLeft => "NO-SPLITS-LEFT",
        };
        f.write_str(s)
    }
}
