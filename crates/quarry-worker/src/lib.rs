//! # quarry-worker
//!
//! The runner pool: a fixed set of OS threads consuming the task store's
//! ready queue. Workers never allocate tasks and never touch the network;
//! they clone an engine, run it under the task's cube and report the outcome
//! back through the store.

pub mod exec;
pub mod pool;

pub use exec::ExecContext;
pub use pool::WorkerPool;
