//! # quarry-base
//!
//! Core types and utilities for the quarry distributed SAT solver.
//!
//! This crate provides the foundational building blocks used across all other
//! quarry crates, including:
//!
//! - **Path Algebra**: binary addresses of task-tree positions
//! - **Error Types**: unified error handling across the solver
//! - **Config**: runtime configuration shared by all components
//! - **Traits**: the wire-serialization interface for protocol types

pub mod config;
pub mod error;
pub mod path;
pub mod traits;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use path::Path;
pub use types::{Cube, Literal, NodeId, TaskResult};
