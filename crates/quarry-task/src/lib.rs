//! # quarry-task
//!
//! The path-addressed task tree: every splitting decision creates two child
//! tasks below their parent, results reduce upward, and a shared ready queue
//! feeds the worker pool. The store is the single writer for task state
//! transitions; workers only execute and report.

pub mod store;
pub mod task;

pub use store::{StoreEvent, TaskStore, WorkItem};
pub use task::{reduce, Reduction, Task, TaskKey, TaskState};
