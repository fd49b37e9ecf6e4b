//! Trail-based SAT search with occurrence-list propagation.
//!
//! The search is deliberately conventional: unit propagation to fixpoint,
//! occurrence-count branching with saved phases, chronological backtracking.
//! Assumptions are placed below the first decision level and are never
//! flipped, so a conflict that exhausts all decisions means UNSAT under the
//! current assumptions.

use quarry_base::Literal;
use quarry_format::{CubeTable, DimacsCnf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// The result of a SAT solve.
#[derive(Debug, Clone)]
pub enum SatResult {
    /// Satisfiable with a model (variable assignments).
    Sat(Vec<bool>),
    /// Unsatisfiable under the given assumptions.
    Unsat,
    /// The search was terminated before reaching a verdict.
    Aborted,
}

/// Outcome of a one-step lookahead.
#[derive(Debug, Clone)]
pub enum LookaheadResult {
    /// A split variable was found; returned as a positive literal.
    Split(Literal),
    /// Propagation under the assumptions completed the assignment.
    Sat(Vec<bool>),
    /// The assumptions contradict the formula.
    Unsat,
    /// The deadline expired before a candidate was chosen.
    TimedOut,
    /// The search was terminated.
    Aborted,
}

/// Solver statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverStats {
    /// Number of decisions made.
    pub decisions: u64,
    /// Number of conflicts encountered.
    pub conflicts: u64,
    /// Number of literals propagated.
    pub propagations: u64,
    /// Number of lookahead probes.
    pub probes: u64,
}

/// An immutable, shareable parsed formula.
///
/// Occurrence lists and branching scores depend only on the clause set, so
/// they are computed once and shared by every solver cloned for a child task.
#[derive(Debug)]
pub struct ParsedFormula {
    /// Number of variables (header count, widened to the largest literal).
    pub num_vars: usize,
    /// Clauses as parsed.
    pub clauses: Vec<Vec<Literal>>,
    /// Pregenerated cube table, if the formula carried `a` lines.
    pub cube_table: Option<CubeTable>,
    /// `occur[code(lit)]` lists the clauses containing `lit`.
    occur: Vec<Vec<u32>>,
    /// Static branching score per variable (total occurrence count).
    occ_score: Vec<u32>,
    /// Initial phase per variable (majority polarity).
    init_phase: Vec<bool>,
    has_empty_clause: bool,
}

/// Index of a literal into occurrence lists.
fn code(lit: Literal) -> usize {
    debug_assert!(lit != 0);
    ((lit.unsigned_abs() as usize - 1) << 1) | usize::from(lit < 0)
}

fn var_index(lit: Literal) -> usize {
    lit.unsigned_abs() as usize - 1
}

impl ParsedFormula {
    /// Prepares a parsed DIMACS formula for solving.
    #[must_use]
    pub fn new(cnf: &DimacsCnf) -> Self {
        let mut num_vars = cnf.num_vars;
        for clause in &cnf.clauses {
            for &l in clause {
                num_vars = num_vars.max(l.unsigned_abs() as usize);
            }
        }
        for cube in &cnf.cubes {
            for &l in cube {
                num_vars = num_vars.max(l.unsigned_abs() as usize);
            }
        }

        let mut occur = vec![Vec::new(); num_vars * 2];
        let mut pos = vec![0u32; num_vars];
        let mut neg = vec![0u32; num_vars];
        let mut has_empty_clause = false;
        for (ci, clause) in cnf.clauses.iter().enumerate() {
            if clause.is_empty() {
                has_empty_clause = true;
                continue;
            }
            for &l in clause {
                occur[code(l)].push(ci as u32);
                if l > 0 {
                    pos[var_index(l)] += 1;
                } else {
                    neg[var_index(l)] += 1;
                }
            }
        }
        let occ_score: Vec<u32> = pos.iter().zip(&neg).map(|(p, n)| p + n).collect();
        let init_phase: Vec<bool> = pos.iter().zip(&neg).map(|(p, n)| p >= n).collect();

        Self {
            num_vars,
            clauses: cnf.clauses.clone(),
            cube_table: cnf.cube_table(),
            occur,
            occ_score,
            init_phase,
            has_empty_clause,
        }
    }
}

/// A single search context over a shared [`ParsedFormula`].
pub struct Solver {
    formula: Arc<ParsedFormula>,
    assigns: Vec<Option<bool>>,
    phase: Vec<bool>,
    trail: Vec<Literal>,
    trail_lim: Vec<usize>,
    /// One entry per decision level: the asserted literal and whether its
    /// negation has already been explored.
    decisions: Vec<(Literal, bool)>,
    prop_head: usize,
    /// Set by `terminate`; sticky for the lifetime of this solver.
    stop: Arc<AtomicBool>,
    /// External cancel flag of the owning task, if bound.
    external_stop: Option<Arc<AtomicBool>>,
    stats: SolverStats,
}

impl Solver {
    /// Creates a fresh search context.
    #[must_use]
    pub fn new(formula: Arc<ParsedFormula>) -> Self {
        let n = formula.num_vars;
        let phase = formula.init_phase.clone();
        Self {
            formula,
            assigns: vec![None; n],
            phase,
            trail: Vec::with_capacity(n),
            trail_lim: Vec::new(),
            decisions: Vec::new(),
            prop_head: 0,
            stop: Arc::new(AtomicBool::new(false)),
            external_stop: None,
            stats: SolverStats::default(),
        }
    }

    /// Binds the cooperative cancel flag of the owning task.
    pub fn bind_stop(&mut self, stop: Arc<AtomicBool>) {
        self.external_stop = Some(stop);
    }

    /// Requests termination. Idempotent; safe from any thread holding a
    /// clone of the shared flag.
    pub fn terminate(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// A shareable handle that terminates this solver.
    #[must_use]
    pub fn terminator(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Solver statistics.
    #[must_use]
    pub fn stats(&self) -> SolverStats {
        self.stats
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
            || self
                .external_stop
                .as_ref()
                .is_some_and(|s| s.load(Ordering::Relaxed))
    }

    fn value(&self, lit: Literal) -> Option<bool> {
        self.assigns[var_index(lit)].map(|b| b == (lit > 0))
    }

    /// Asserts a literal. Returns false on immediate contradiction.
    fn enqueue(&mut self, lit: Literal) -> bool {
        match self.value(lit) {
            Some(true) => true,
            Some(false) => false,
            None => {
                let v = var_index(lit);
                self.assigns[v] = Some(lit > 0);
                self.phase[v] = lit > 0;
                self.trail.push(lit);
                true
            }
        }
    }

    /// Unit propagation to fixpoint. Returns a conflicting clause index.
    fn propagate(&mut self) -> Option<u32> {
        let formula = Arc::clone(&self.formula);
        while self.prop_head < self.trail.len() {
            let lit = self.trail[self.prop_head];
            self.prop_head += 1;
            self.stats.propagations += 1;

            for &ci in &formula.occur[code(-lit)] {
                let clause = &formula.clauses[ci as usize];
                let mut satisfied = false;
                let mut unit: Option<Literal> = None;
                let mut open = 0u32;
                for &l in clause {
                    match self.value(l) {
                        Some(true) => {
                            satisfied = true;
                            break;
                        }
                        Some(false) => {}
                        None => {
                            open += 1;
                            if open > 1 {
                                break;
                            }
                            unit = Some(l);
                        }
                    }
                }
                if satisfied || open > 1 {
                    continue;
                }
                if open == 0 {
                    return Some(ci);
                }
                let u = unit.unwrap();
                let ok = self.enqueue(u);
                debug_assert!(ok, "unit literal was unassigned");
            }
        }
        None
    }

    fn reset_search(&mut self) {
        self.assigns.fill(None);
        self.trail.clear();
        self.trail_lim.clear();
        self.decisions.clear();
        self.prop_head = 0;
    }

    /// Places assumptions and unit clauses on the trail root.
    /// Returns false on immediate contradiction.
    fn seed(&mut self, assumptions: &[Literal]) -> bool {
        if self.formula.has_empty_clause {
            return false;
        }
        for &a in assumptions {
            debug_assert!(a != 0);
            if !self.enqueue(a) {
                return false;
            }
        }
        let formula = Arc::clone(&self.formula);
        for clause in &formula.clauses {
            if clause.len() == 1 && !self.enqueue(clause[0]) {
                return false;
            }
        }
        true
    }

    fn decide(&mut self, lit: Literal) {
        self.trail_lim.push(self.trail.len());
        self.decisions.push((lit, false));
        let ok = self.enqueue(lit);
        debug_assert!(ok, "decision variable was assigned");
    }

    fn undo_last_level(&mut self) -> (Literal, bool) {
        let lim = self.trail_lim.pop().expect("no level to undo");
        let decision = self.decisions.pop().expect("no decision to undo");
        for l in self.trail.drain(lim..) {
            self.assigns[var_index(l)] = None;
        }
        self.prop_head = lim;
        decision
    }

    /// Chronological backtracking: undo levels until an unflipped decision
    /// is found, then assert its negation. Returns false when the tree is
    /// exhausted (UNSAT under the seeded assumptions).
    fn backtrack_after_conflict(&mut self) -> bool {
        while !self.decisions.is_empty() {
            let (lit, flipped) = self.undo_last_level();
            if !flipped {
                self.trail_lim.push(self.trail.len());
                self.decisions.push((-lit, true));
                let ok = self.enqueue(-lit);
                debug_assert!(ok, "flipped decision was assigned");
                return true;
            }
        }
        false
    }

    fn pick_branch(&self) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (v, a) in self.assigns.iter().enumerate() {
            if a.is_none() {
                let score = self.formula.occ_score[v];
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((v, score));
                }
            }
        }
        best.map(|(v, _)| v)
    }

    fn extract_model(&self) -> Vec<bool> {
        self.assigns
            .iter()
            .zip(&self.formula.init_phase)
            .map(|(a, &p)| a.unwrap_or(p))
            .collect()
    }

    /// Solves under the given assumptions.
    pub fn solve(&mut self, assumptions: &[Literal]) -> SatResult {
        self.reset_search();
        if !self.seed(assumptions) {
            return SatResult::Unsat;
        }
        loop {
            if self.stopped() {
                return SatResult::Aborted;
            }
            if self.propagate().is_some() {
                self.stats.conflicts += 1;
                if !self.backtrack_after_conflict() {
                    return SatResult::Unsat;
                }
            } else if let Some(var) = self.pick_branch() {
                self.stats.decisions += 1;
                let lit = if self.phase[var] {
                    (var + 1) as Literal
                } else {
                    -((var + 1) as Literal)
                };
                self.decide(lit);
            } else {
                return SatResult::Sat(self.extract_model());
            }
        }
    }

    /// Probes one polarity of a candidate: how many literals does asserting
    /// it imply, or does it fail outright?
    fn probe(&mut self, lit: Literal) -> Option<usize> {
        self.stats.probes += 1;
        let before = self.trail.len();
        self.trail_lim.push(before);
        self.decisions.push((lit, false));
        let ok = self.enqueue(lit);
        debug_assert!(ok);
        let conflict = self.propagate().is_some();
        let implied = self.trail.len() - before;
        self.undo_last_level();
        if conflict {
            None
        } else {
            Some(implied)
        }
    }

    fn assert_root(&mut self, lit: Literal) -> bool {
        debug_assert!(self.decisions.is_empty());
        self.enqueue(lit) && self.propagate().is_none()
    }

    /// One-step lookahead under the given assumptions.
    ///
    /// Candidates are probed in both polarities (failed literals are asserted
    /// on the spot); the split variable maximizes the product of implied
    /// assignments. The deadline is checked between probes.
    pub fn lookahead(
        &mut self,
        assumptions: &[Literal],
        deadline: Option<Instant>,
    ) -> LookaheadResult {
        self.reset_search();
        if !self.seed(assumptions) {
            return LookaheadResult::Unsat;
        }
        if self.propagate().is_some() {
            return LookaheadResult::Unsat;
        }

        // Candidates by static score, best first.
        let mut candidates: Vec<usize> = (0..self.formula.num_vars)
            .filter(|&v| self.assigns[v].is_none())
            .collect();
        if candidates.is_empty() {
            return LookaheadResult::Sat(self.extract_model());
        }
        candidates.sort_unstable_by_key(|&v| std::cmp::Reverse(self.formula.occ_score[v]));
        candidates.truncate(16);

        let mut best: Option<(usize, u64)> = None;
        for v in candidates {
            if self.stopped() {
                return LookaheadResult::Aborted;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                // Honor the caller's budget: an expired deadline means no
                // split, even if a candidate was already scored.
                return LookaheadResult::TimedOut;
            }
            if self.assigns[v].is_some() {
                continue;
            }
            let lit = (v + 1) as Literal;
            let up = match self.probe(lit) {
                Some(n) => n,
                None => {
                    if !self.assert_root(-lit) {
                        return LookaheadResult::Unsat;
                    }
                    continue;
                }
            };
            let down = match self.probe(-lit) {
                Some(n) => n,
                None => {
                    if !self.assert_root(lit) {
                        return LookaheadResult::Unsat;
                    }
                    continue;
                }
            };
            let score = (up as u64 + 1) * (down as u64 + 1);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((v, score));
            }
        }

        if let Some((v, _)) = best {
            return LookaheadResult::Split((v + 1) as Literal);
        }
        // Every candidate was implied away by failed-literal assertions.
        match self.pick_branch() {
            Some(v) => LookaheadResult::Split((v + 1) as Literal),
            None => LookaheadResult::Sat(self.extract_model()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver_for(input: &str) -> Solver {
        let cnf = DimacsCnf::parse_str(input).unwrap();
        Solver::new(Arc::new(ParsedFormula::new(&cnf)))
    }

    #[test]
    fn test_unit_propagation_chain() {
        // 1 forces 2 forces 3.
        let mut s = solver_for("p cnf 3 3\n1 0\n-1 2 0\n-2 3 0\n");
        match s.solve(&[]) {
            SatResult::Sat(model) => assert_eq!(model, vec![true, true, true]),
            other => panic!("expected SAT, got {other:?}"),
        }
    }

    #[test]
    fn test_conflicting_units() {
        let mut s = solver_for("p cnf 1 2\n1 0\n-1 0\n");
        assert!(matches!(s.solve(&[]), SatResult::Unsat));
    }

    #[test]
    fn test_assumptions_restrict() {
        let mut s = solver_for("p cnf 2 1\n1 2 0\n");
        assert!(matches!(s.solve(&[-1, -2]), SatResult::Unsat));
        assert!(matches!(s.solve(&[-1]), SatResult::Sat(_)));
    }

    #[test]
    fn test_terminate_aborts() {
        let mut s = solver_for("p cnf 2 1\n1 2 0\n");
        s.terminate();
        assert!(matches!(s.solve(&[]), SatResult::Aborted));
    }

    #[test]
    fn test_lookahead_split_then_verdicts() {
        let mut s = solver_for("p cnf 3 2\n1 2 0\n-1 3 0\n");
        match s.lookahead(&[], None) {
            LookaheadResult::Split(lit) => assert!(lit > 0),
            other => panic!("expected a split, got {other:?}"),
        }
        assert!(matches!(
            s.lookahead(&[-1, -2], None),
            LookaheadResult::Unsat
        ));
    }

    #[test]
    fn test_lookahead_expired_deadline() {
        let mut s = solver_for("p cnf 3 2\n1 2 0\n-1 3 0\n");
        let past = Instant::now() - std::time::Duration::from_millis(1);
        assert!(matches!(
            s.lookahead(&[], Some(past)),
            LookaheadResult::TimedOut
        ));
    }
}
