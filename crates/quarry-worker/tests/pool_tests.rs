//! End-to-end tests: formula in, verdict out, through the real pool.

use crossbeam_channel::{unbounded, Receiver};
use quarry_base::{Config, Path, TaskResult};
use quarry_cdcl::{parse_engine, EngineRegistry, FormulaSource};
use quarry_task::{StoreEvent, TaskKey, TaskStore};
use quarry_worker::{ExecContext, WorkerPool};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    ctx: ExecContext,
    events: Receiver<StoreEvent>,
}

fn harness(dimacs: &str, cube_depth: u8) -> Harness {
    let config = Arc::new(Config {
        workers: 2,
        cube_depth,
        ..Config::default()
    });
    let (tx, rx) = unbounded();
    let store = Arc::new(TaskStore::new(config.queue_soft_bound(), tx));
    let engines = Arc::new(EngineRegistry::new());
    let engine = parse_engine(FormulaSource::Blob(dimacs.as_bytes().to_vec()), 1).unwrap();
    engines.insert(engine);
    Harness {
        ctx: ExecContext {
            store,
            engines,
            config,
        },
        events: rx,
    }
}

fn run_to_verdict(h: &Harness) -> (TaskResult, Option<Vec<i32>>) {
    let pool = WorkerPool::spawn(h.ctx.clone());
    h.ctx.store.new_root(1);
    let verdict = loop {
        let event = h
            .events
            .recv_timeout(Duration::from_secs(30))
            .expect("verdict in time");
        match event {
            StoreEvent::RootDone {
                result, witness, ..
            } => break (result, witness),
            StoreEvent::QueuePressure { .. } | StoreEvent::PushedTaskDone { .. } => continue,
        }
    };
    pool.shutdown();
    verdict
}

#[test]
fn test_trivial_sat_single_node() {
    let h = harness("p cnf 1 1\n1 0\n", 0);
    let (result, witness) = run_to_verdict(&h);
    assert_eq!(result, TaskResult::Sat);
    assert_eq!(witness.unwrap(), vec![1]);
}

#[test]
fn test_trivial_unsat_single_node() {
    let h = harness("p cnf 1 2\n1 0\n-1 0\n", 0);
    let (result, witness) = run_to_verdict(&h);
    assert_eq!(result, TaskResult::Unsat);
    assert!(witness.is_none());
}

#[test]
fn test_cube_split_single_node() {
    let h = harness("p cnf 2 1\n1 2 0\n", 1);
    let (result, witness) = run_to_verdict(&h);
    assert_eq!(result, TaskResult::Sat);

    // The root was split once: both depth-1 children exist.
    let left = TaskKey::new(1, Path::root().left().unwrap());
    let right = TaskKey::new(1, Path::root().right().unwrap());
    assert!(h.ctx.store.contains(left));
    assert!(h.ctx.store.contains(right));

    // The witness satisfies the clause.
    let model = witness.unwrap();
    assert!(model.contains(&1) || model.contains(&2));
}

#[test]
fn test_pregenerated_cube_table() {
    // Four cubes over the first two variables; the solver walks the cube
    // tree structurally and solves the four leaves.
    let dimacs = "p cnf 3 2\n1 2 3 0\n-3 1 0\na 1 2 0\na 1 -2 0\na -1 2 0\na -1 -2 0\n";
    let h = harness(dimacs, 0);
    let (result, _witness) = run_to_verdict(&h);
    assert_eq!(result, TaskResult::Sat);

    // The depth-2 table leaves were materialized.
    let leaf = TaskKey::new(1, Path::from_parts(2, 0b00).unwrap());
    assert!(h.ctx.store.contains(leaf));
}

#[test]
fn test_unsat_needs_all_cubes() {
    // UNSAT formula with a cube table: every leaf must report UNSAT.
    let dimacs = "p cnf 2 4\n1 2 0\n1 -2 0\n-1 2 0\n-1 -2 0\na 1 0\na -1 0\n";
    let h = harness(dimacs, 0);
    let (result, _witness) = run_to_verdict(&h);
    assert_eq!(result, TaskResult::Unsat);
}

#[test]
fn test_deeper_cube_depth_still_correct() {
    // An 8-variable satisfiable formula, forced through two split levels.
    let dimacs = "p cnf 8 6\n1 2 0\n-2 3 0\n3 4 0\n-4 5 0\n5 6 0\n7 8 0\n";
    let h = harness(dimacs, 2);
    let (result, witness) = run_to_verdict(&h);
    assert_eq!(result, TaskResult::Sat);
    let model = witness.unwrap();
    let cnf = quarry_format::DimacsCnf::parse_str(dimacs).unwrap();
    for clause in &cnf.clauses {
        assert!(
            clause.iter().any(|l| model.contains(l)),
            "clause {clause:?} unsatisfied"
        );
    }
}
