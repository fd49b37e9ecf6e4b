//! The engine contract between the task runner and a SAT back-end.

use crate::solver::{LookaheadResult, ParsedFormula, SatResult, Solver};
use quarry_base::{Error, Literal, NodeId, Result};
use quarry_format::{CubeTable, DimacsCnf};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Verdict of a leaf solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveVerdict {
    Sat,
    Unsat,
    /// Terminated before a verdict.
    Aborted,
    /// The engine gave up without a verdict.
    Unknown,
}

/// Outcome of a one-step cube generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeOutcome {
    /// Split on this literal: left child assumes it, right child its
    /// negation.
    Splitted(Literal),
    /// Lookahead already decided the sub-formula.
    Sat,
    Unsat,
    /// No further split is available (includes lookahead timeout).
    NoSplitsLeft,
    /// Terminated while generating.
    Aborted,
}

/// Where a formula comes from.
#[derive(Debug, Clone)]
pub enum FormulaSource {
    /// A DIMACS file on disk.
    File(PathBuf),
    /// An in-memory DIMACS blob, e.g. received from a peer.
    Blob(Vec<u8>),
}

/// The contract a pluggable SAT engine has to satisfy.
///
/// An engine is created per formula by parsing, then cloned per child task.
/// Children never mutate their parent. `terminate` may be called from any
/// thread while `solve` or `generate_cubes` runs on a worker.
pub trait SolverEngine: Send + Sync {
    /// The id of the node that introduced this formula.
    fn originator(&self) -> NodeId;

    /// An independent engine pre-loaded with this engine's clauses.
    fn clone_for_child(&self) -> Box<dyn SolverEngine>;

    /// Sets the assumption set for subsequent `solve`/`generate_cubes`.
    fn assume(&mut self, cube: &[Literal]);

    /// Solves under the current assumptions.
    fn solve(&mut self) -> SolveVerdict;

    /// One-step lookahead picking a split literal, bounded by `timeout`.
    fn generate_cubes(&mut self, max_depth: u8, min_depth: u8, timeout: Duration) -> CubeOutcome;

    /// Idempotent asynchronous cancel; safe from any thread.
    fn terminate(&self);

    /// Binds the cooperative cancel flag of the owning task.
    fn bind_stop(&mut self, stop: Arc<AtomicBool>);

    /// The satisfying assignment, present after a SAT verdict.
    fn assignment(&self) -> Option<Vec<Literal>>;

    /// The formula's pregenerated cube table, if any.
    fn cube_table(&self) -> Option<&CubeTable>;
}

/// A DIMACS file materialized for parsing, removed again on drop.
#[derive(Debug)]
struct TempCnfFile {
    path: PathBuf,
}

impl Drop for TempCnfFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove temp formula file");
        } else {
            tracing::trace!(path = %self.path.display(), "removed temp formula file");
        }
    }
}

fn materialize_blob(originator: NodeId, blob: &[u8]) -> Result<TempCnfFile> {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let path = std::env::temp_dir().join(format!(
        "quarry-{}-{}-{}.cnf",
        std::process::id(),
        originator,
        nanos
    ));
    let mut file = File::create(&path)?;
    file.write_all(blob)?;
    file.sync_all()?;
    tracing::trace!(path = %path.display(), bytes = blob.len(), "materialized formula blob");
    Ok(TempCnfFile { path })
}

/// Shared per-formula state: the prepared clauses plus the temp file guard
/// keeping a blob-materialized formula alive until the last engine drops.
#[derive(Debug)]
struct EngineRoot {
    formula: Arc<ParsedFormula>,
    _temp: Option<TempCnfFile>,
}

/// The built-in engine: the trail-based search of [`crate::solver`] behind
/// the [`SolverEngine`] contract.
pub struct CdclEngine {
    originator: NodeId,
    root: Arc<EngineRoot>,
    solver: Solver,
    assumptions: Vec<Literal>,
    assignment: Option<Vec<Literal>>,
}

impl CdclEngine {
    /// Parses a formula and produces the root engine for it.
    ///
    /// A blob source is materialized into a temp file first; the file is
    /// deleted when the last engine over this formula is dropped.
    pub fn parse(source: FormulaSource, originator: NodeId) -> Result<Self> {
        let (path, temp) = match source {
            FormulaSource::File(path) => (path, None),
            FormulaSource::Blob(blob) => {
                let temp = materialize_blob(originator, &blob)?;
                (temp.path.clone(), Some(temp))
            }
        };

        tracing::debug!(path = %path.display(), originator, "parsing DIMACS formula");
        let file = File::open(&path)?;
        let cnf = DimacsCnf::from_reader(file)?;
        let formula = Arc::new(ParsedFormula::new(&cnf));
        if let Some(table) = &formula.cube_table {
            tracing::debug!(
                cubes = table.len(),
                normalized_length = table.normalized_length(),
                "formula carries a pregenerated cube table"
            );
        }
        let solver = Solver::new(Arc::clone(&formula));
        Ok(Self {
            originator,
            root: Arc::new(EngineRoot {
                formula,
                _temp: temp,
            }),
            solver,
            assumptions: Vec::new(),
            assignment: None,
        })
    }

}

impl SolverEngine for CdclEngine {
    fn originator(&self) -> NodeId {
        self.originator
    }

    fn clone_for_child(&self) -> Box<dyn SolverEngine> {
        Box::new(CdclEngine {
            originator: self.originator,
            root: Arc::clone(&self.root),
            solver: Solver::new(Arc::clone(&self.root.formula)),
            assumptions: Vec::new(),
            assignment: None,
        })
    }

    fn assume(&mut self, cube: &[Literal]) {
        self.assumptions.clear();
        self.assumptions.extend_from_slice(cube);
    }

    fn solve(&mut self) -> SolveVerdict {
        match self.solver.solve(&self.assumptions) {
            SatResult::Sat(model) => {
                self.assignment = Some(
                    model
                        .iter()
                        .enumerate()
                        .map(|(i, &v)| {
                            let lit = (i + 1) as Literal;
                            if v {
                                lit
                            } else {
                                -lit
                            }
                        })
                        .collect(),
                );
                SolveVerdict::Sat
            }
            SatResult::Unsat => SolveVerdict::Unsat,
            SatResult::Aborted => SolveVerdict::Aborted,
        }
    }

    fn generate_cubes(&mut self, _max_depth: u8, _min_depth: u8, timeout: Duration) -> CubeOutcome {
        let deadline = Instant::now().checked_add(timeout);
        match self.solver.lookahead(&self.assumptions, deadline) {
            LookaheadResult::Split(lit) => CubeOutcome::Splitted(lit),
            LookaheadResult::Sat(model) => {
                self.assignment = Some(
                    model
                        .iter()
                        .enumerate()
                        .map(|(i, &v)| {
                            let lit = (i + 1) as Literal;
                            if v {
                                lit
                            } else {
                                -lit
                            }
                        })
                        .collect(),
                );
                CubeOutcome::Sat
            }
            LookaheadResult::Unsat => CubeOutcome::Unsat,
            LookaheadResult::TimedOut => CubeOutcome::NoSplitsLeft,
            LookaheadResult::Aborted => CubeOutcome::Aborted,
        }
    }

    fn terminate(&self) {
        self.solver.terminate();
    }

    fn bind_stop(&mut self, stop: Arc<AtomicBool>) {
        self.solver.bind_stop(stop);
    }

    fn assignment(&self) -> Option<Vec<Literal>> {
        self.assignment.clone()
    }

    fn cube_table(&self) -> Option<&CubeTable> {
        self.root.formula.cube_table.as_ref()
    }
}

/// Parses a formula into a boxed engine, folding I/O problems into the
/// parse-error taxonomy (a missing file is fatal for the root either way).
pub fn parse_engine(source: FormulaSource, originator: NodeId) -> Result<Box<dyn SolverEngine>> {
    let engine = CdclEngine::parse(source, originator).map_err(|e| match e {
        Error::Io(io) => Error::Parse(io.to_string()),
        other => other,
    })?;
    Ok(Box::new(engine))
}

/// Root engines by originator: the parsed formula of each known originator,
/// cloned per child task by the workers.
#[derive(Default)]
pub struct EngineRegistry {
    map: std::sync::RwLock<std::collections::HashMap<NodeId, Arc<dyn SolverEngine>>>,
}

impl EngineRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the root engine of an originator. A later parse of the same
    /// formula supersedes the earlier engine.
    pub fn insert(&self, engine: Box<dyn SolverEngine>) {
        let originator = engine.originator();
        self.map.write().unwrap().insert(originator, Arc::from(engine));
    }

    /// The root engine of an originator.
    #[must_use]
    pub fn get(&self, originator: NodeId) -> Option<Arc<dyn SolverEngine>> {
        self.map.read().unwrap().get(&originator).cloned()
    }

    /// Whether a formula of this originator has been parsed.
    #[must_use]
    pub fn contains(&self, originator: NodeId) -> bool {
        self.map.read().unwrap().contains_key(&originator)
    }

    /// All originators with a parsed formula.
    #[must_use]
    pub fn originators(&self) -> Vec<NodeId> {
        self.map.read().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_parse_removes_temp_file() {
        let blob = b"p cnf 1 1\n1 0\n".to_vec();
        let path = {
            let mut engine = CdclEngine::parse(FormulaSource::Blob(blob), 7).unwrap();
            assert_eq!(engine.solve(), SolveVerdict::Sat);
            engine.root._temp.as_ref().unwrap().path.clone()
        };
        assert!(!path.exists(), "temp file must be removed on drop");
    }

    #[test]
    fn test_children_are_independent() {
        let blob = b"p cnf 2 1\n1 2 0\n".to_vec();
        let mut parent = CdclEngine::parse(FormulaSource::Blob(blob), 1).unwrap();
        let mut child = parent.clone_for_child();
        child.assume(&[-1, -2]);
        assert_eq!(child.solve(), SolveVerdict::Unsat);
        // The parent's assumption set is untouched.
        assert_eq!(parent.solve(), SolveVerdict::Sat);
        let model = parent.assignment().unwrap();
        assert!(model.contains(&1) || model.contains(&2));
    }

    #[test]
    fn test_terminate_then_solve_aborts() {
        let blob = b"p cnf 1 1\n1 0\n".to_vec();
        let mut engine = CdclEngine::parse(FormulaSource::Blob(blob), 1).unwrap();
        engine.terminate();
        assert_eq!(engine.solve(), SolveVerdict::Aborted);
    }
}
