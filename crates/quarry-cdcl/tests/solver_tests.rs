//! End-to-end tests for the embedded engine.

use quarry_cdcl::{CdclEngine, CubeOutcome, FormulaSource, SolveVerdict, SolverEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn engine_for(dimacs: &str) -> CdclEngine {
    CdclEngine::parse(FormulaSource::Blob(dimacs.as_bytes().to_vec()), 1).unwrap()
}

fn check_model(dimacs: &str, model: &[i32]) {
    let cnf = quarry_format::DimacsCnf::parse_str(dimacs).unwrap();
    for clause in &cnf.clauses {
        assert!(
            clause.iter().any(|l| model.contains(l)),
            "clause {clause:?} not satisfied by {model:?}"
        );
    }
}

// =============================================================================
// Leaf solving
// =============================================================================

#[test]
fn test_trivial_sat() {
    let mut engine = engine_for("p cnf 1 1\n1 0\n");
    assert_eq!(engine.solve(), SolveVerdict::Sat);
    assert_eq!(engine.assignment().unwrap(), vec![1]);
}

#[test]
fn test_trivial_unsat() {
    let mut engine = engine_for("p cnf 1 2\n1 0\n-1 0\n");
    assert_eq!(engine.solve(), SolveVerdict::Unsat);
    assert!(engine.assignment().is_none());
}

#[test]
fn test_empty_clause_is_unsat() {
    let mut engine = engine_for("p cnf 2 2\n1 2 0\n0\n");
    assert_eq!(engine.solve(), SolveVerdict::Unsat);
}

#[test]
fn test_simple_sat_model_is_consistent() {
    let dimacs = "p cnf 3 3\n1 2 0\n-1 3 0\n-2 -3 0\n";
    let mut engine = engine_for(dimacs);
    assert_eq!(engine.solve(), SolveVerdict::Sat);
    check_model(dimacs, &engine.assignment().unwrap());
}

#[test]
fn test_pigeonhole_3_2_unsat() {
    // Three pigeons, two holes: var (p, h) = 2p + h + 1.
    let dimacs = "p cnf 6 9\n\
        1 2 0\n3 4 0\n5 6 0\n\
        -1 -3 0\n-1 -5 0\n-3 -5 0\n\
        -2 -4 0\n-2 -6 0\n-4 -6 0\n";
    let mut engine = engine_for(dimacs);
    assert_eq!(engine.solve(), SolveVerdict::Unsat);
}

#[test]
fn test_larger_satisfiable_chain() {
    // An implication cycle over 8 variables plus a seed.
    let mut dimacs = String::from("p cnf 8 9\n1 0\n");
    for v in 1..8 {
        dimacs.push_str(&format!("-{} {} 0\n", v, v + 1));
    }
    dimacs.push_str("-8 1 0\n");
    let mut engine = engine_for(&dimacs);
    assert_eq!(engine.solve(), SolveVerdict::Sat);
    let model = engine.assignment().unwrap();
    assert_eq!(model, (1..=8).collect::<Vec<i32>>());
}

// =============================================================================
// Assumptions / cubes
// =============================================================================

#[test]
fn test_cube_assumptions_decide_branch() {
    let mut engine = engine_for("p cnf 2 1\n1 2 0\n");
    engine.assume(&[1]);
    assert_eq!(engine.solve(), SolveVerdict::Sat);
    assert!(engine.assignment().unwrap().contains(&1));

    engine.assume(&[-1, -2]);
    assert_eq!(engine.solve(), SolveVerdict::Unsat);

    // Clearing the assumptions restores the full formula.
    engine.assume(&[]);
    assert_eq!(engine.solve(), SolveVerdict::Sat);
}

// =============================================================================
// Cube generation
// =============================================================================

#[test]
fn test_generate_cubes_splits() {
    let mut engine = engine_for("p cnf 4 3\n1 2 0\n-1 3 0\n3 4 0\n");
    match engine.generate_cubes(1, 1, Duration::from_secs(5)) {
        CubeOutcome::Splitted(lit) => {
            assert!(lit > 0, "split literal is returned positive");
            assert!(lit <= 4);
        }
        other => panic!("expected a split, got {other:?}"),
    }
}

#[test]
fn test_generate_cubes_detects_unsat() {
    let mut engine = engine_for("p cnf 2 4\n1 2 0\n1 -2 0\n-1 2 0\n-1 -2 0\n");
    assert_eq!(
        engine.generate_cubes(1, 1, Duration::from_secs(5)),
        CubeOutcome::Unsat
    );
}

#[test]
fn test_generate_cubes_zero_timeout() {
    let mut engine = engine_for("p cnf 3 2\n1 2 0\n2 3 0\n");
    assert_eq!(
        engine.generate_cubes(1, 1, Duration::ZERO),
        CubeOutcome::NoSplitsLeft
    );
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_external_stop_flag_aborts() {
    let mut engine = engine_for("p cnf 2 1\n1 2 0\n");
    let stop = Arc::new(AtomicBool::new(true));
    engine.bind_stop(Arc::clone(&stop));
    assert_eq!(engine.solve(), SolveVerdict::Aborted);

    stop.store(false, Ordering::SeqCst);
    assert_eq!(engine.solve(), SolveVerdict::Sat);
}

// =============================================================================
// Pregenerated cube tables
// =============================================================================

#[test]
fn test_cube_table_exposed() {
    let dimacs = "p cnf 2 1\n1 2 0\na 1 0\na -1 2 0\n";
    let engine = engine_for(dimacs);
    let table = engine.cube_table().unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.normalized_length(), 1);
}
