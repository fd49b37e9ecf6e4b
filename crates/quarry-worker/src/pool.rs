//! The fixed worker thread pool.

use crate::exec::{execute, ExecContext};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// A fixed pool of worker threads consuming the ready queue.
pub struct WorkerPool {
    ctx: ExecContext,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `config.workers` named worker threads.
    pub fn spawn(ctx: ExecContext) -> Self {
        let count = ctx.config.workers.max(1);
        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            let ctx = ctx.clone();
            let handle = thread::Builder::new()
                .name(format!("quarry-worker-{id}"))
                .spawn(move || worker_loop(id, ctx))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }
        tracing::info!(workers = count, "worker pool started");
        Self { ctx, workers }
    }

    /// Number of worker threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Stops the pool: wakes all workers out of their queue wait and joins
    /// them. Running engines observe their task's stop flag and are expected
    /// to return within the cancellation grace period.
    pub fn shutdown(self) {
        self.ctx.store.shutdown();
        let deadline = Instant::now() + self.ctx.config.cancel_grace;
        for worker in self.workers {
            let _ = worker.join();
        }
        if Instant::now() > deadline {
            tracing::warn!("engines exceeded the cancellation grace period");
        }
        tracing::info!("worker pool stopped");
    }
}

fn worker_loop(id: usize, ctx: ExecContext) {
    tracing::debug!(worker = id, "worker started");
    while let Some(item) = ctx.store.pop_work(id) {
        execute(&ctx, id, item);
    }
    tracing::debug!(worker = id, "worker stopped");
}
