//! Execution of a single claimed task: split it further or solve it.

use quarry_base::{Config, Cube, TaskResult};
use quarry_cdcl::{CubeOutcome, EngineRegistry, SolveVerdict};
use quarry_task::{TaskStore, WorkItem};
use std::sync::Arc;

/// Splitting stops growing the tree past this depth when no explicit cube
/// depth was configured.
const ADAPTIVE_SPLIT_DEPTH_CAP: u8 = 20;

/// Shared state handed to every worker.
#[derive(Clone)]
pub struct ExecContext {
    pub store: Arc<TaskStore>,
    pub engines: Arc<EngineRegistry>,
    pub config: Arc<Config>,
}

enum SplitPlan {
    /// Inner node of a pregenerated cube tree: split without a literal.
    Structural,
    /// Ask the engine's lookahead for a split literal.
    Lookahead,
    /// Solve as a leaf.
    Leaf,
}

impl ExecContext {
    fn split_plan(&self, item: &WorkItem, table_length: Option<u8>) -> SplitPlan {
        let depth = item.key.path.length();
        if let Some(norm) = table_length {
            if depth < norm {
                return SplitPlan::Structural;
            }
        }
        if self.config.cube_depth > 0 {
            if depth < self.config.cube_depth {
                return SplitPlan::Lookahead;
            }
            return SplitPlan::Leaf;
        }
        // Adaptive mode: keep splitting while the pool is underfed.
        if depth < ADAPTIVE_SPLIT_DEPTH_CAP && self.store.queued_len() < self.config.workers {
            return SplitPlan::Lookahead;
        }
        SplitPlan::Leaf
    }
}

/// Runs one claimed task to a store transition.
pub fn execute(ctx: &ExecContext, worker: usize, item: WorkItem) {
    let key = item.key;
    let Some(root) = ctx.engines.get(key.originator) else {
        // The broker parses before it queues, so this is a lifecycle bug;
        // surface it as an aborted attempt rather than wedging the tree.
        tracing::warn!(%key, "no engine for originator, aborting task");
        report(ctx, item, TaskResult::Aborted, None);
        return;
    };

    let mut engine = root.clone_for_child();
    engine.bind_stop(Arc::clone(&item.stop));

    // At or below table depth the governing table cube joins whatever the
    // task carried.
    let mut cube: Cube = item.cube.clone();
    let table_length = engine.cube_table().map(|t| t.normalized_length());
    if let Some(table) = engine.cube_table() {
        if let Some(extra) = table.cube_along_path(key.path) {
            cube.extend_from_slice(extra);
        }
    }
    engine.assume(&cube);

    match ctx.split_plan(&item, table_length) {
        SplitPlan::Structural => {
            tracing::trace!(%key, worker, "structural split");
            if let Err(e) = ctx.store.split(key, None, None) {
                tracing::debug!(%key, error = %e, "structural split rejected");
            }
            return;
        }
        SplitPlan::Lookahead => {
            let timeout = ctx.config.initial_split_timeout;
            match engine.generate_cubes(1, 1, timeout) {
                CubeOutcome::Splitted(lit) => {
                    tracing::trace!(%key, worker, lit, "split on lookahead literal");
                    if let Err(e) = ctx.store.split(key, Some(lit), Some(-lit)) {
                        tracing::debug!(%key, error = %e, "split rejected");
                    }
                    return;
                }
                CubeOutcome::Sat => {
                    report(ctx, item, TaskResult::Sat, engine.assignment());
                    return;
                }
                CubeOutcome::Unsat => {
                    report(ctx, item, TaskResult::Unsat, None);
                    return;
                }
                CubeOutcome::Aborted => {
                    report(ctx, item, TaskResult::Aborted, None);
                    return;
                }
                CubeOutcome::NoSplitsLeft => {
                    tracing::trace!(%key, worker, "no splits left, solving as leaf");
                }
            }
        }
        SplitPlan::Leaf => {}
    }

    let verdict = engine.solve();
    match verdict {
        SolveVerdict::Sat => report(ctx, item, TaskResult::Sat, engine.assignment()),
        SolveVerdict::Unsat => report(ctx, item, TaskResult::Unsat, None),
        SolveVerdict::Aborted => report(ctx, item, TaskResult::Aborted, None),
        SolveVerdict::Unknown => report(ctx, item, TaskResult::Unknown, None),
    }
}

fn report(
    ctx: &ExecContext,
    item: WorkItem,
    result: TaskResult,
    witness: Option<Vec<quarry_base::Literal>>,
) {
    if let Err(e) = ctx.store.complete(item.key, result, witness) {
        // The subtree may have been dropped while we were solving.
        tracing::trace!(key = %item.key, error = %e, "stale completion dropped");
    }
}
