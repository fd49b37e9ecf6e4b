//! # quarry-cdcl
//!
//! The embedded SAT engine and the engine contract used by the task runner.
//!
//! The [`SolverEngine`] trait is the seam for plugging solver back-ends: the
//! rest of the system only ever talks to an engine through
//! assume/solve/generate_cubes/terminate. The built-in [`CdclEngine`] is a
//! trail-based search with occurrence-list propagation, good enough to drive
//! the distributed machinery; industrial engines replace it behind the same
//! trait.

pub mod engine;
pub mod solver;

pub use engine::{
    parse_engine, CdclEngine, CubeOutcome, EngineRegistry, FormulaSource, SolveVerdict,
    SolverEngine,
};
pub use solver::{ParsedFormula, SatResult, Solver, SolverStats};
