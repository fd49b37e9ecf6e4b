//! # quarry-format
//!
//! DIMACS CNF parsing and serialization, including the `a <lit>* 0` cube
//! lines that carry a pregenerated cube table.

pub mod dimacs;

pub use dimacs::{CubeTable, DimacsCnf};
