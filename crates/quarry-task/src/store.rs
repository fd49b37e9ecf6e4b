//! The task store: owner of all task objects and the ready queue.
//!
//! Locking discipline: the map mutex and the ready-queue mutex are only ever
//! held briefly and never across a task mutex acquisition that could wait on
//! another thread holding them; task mutexes are taken one at a time (parent
//! and child are never held together).

use crate::task::{reduce, Reduction, Task, TaskKey, TaskState};
use crossbeam_channel::Sender;
use quarry_base::{Cube, Error, Literal, NodeId, Path, Result, TaskResult};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Notifications the store publishes to the broker.
#[derive(Debug)]
pub enum StoreEvent {
    /// A local root finished; its verdict is the final answer for that
    /// formula.
    RootDone {
        key: TaskKey,
        result: TaskResult,
        witness: Option<Vec<Literal>>,
    },
    /// A task pushed to us by a peer finished; the result goes back to it.
    PushedTaskDone {
        key: TaskKey,
        peer: NodeId,
        result: TaskResult,
        witness: Option<Vec<Literal>>,
    },
    /// The ready queue crossed its soft bound; offloading is advisable.
    QueuePressure { queued: usize },
}

/// A claimed unit of work, snapshotted for a worker.
#[derive(Debug)]
pub struct WorkItem {
    pub key: TaskKey,
    pub cube: Cube,
    /// The task's cooperative cancel flag; bind it to the engine.
    pub stop: Arc<AtomicBool>,
}

/// Owns all tasks, keyed by `(originator, path)`.
pub struct TaskStore {
    tasks: Mutex<HashMap<TaskKey, Arc<Mutex<Task>>>>,
    ready: Mutex<VecDeque<TaskKey>>,
    ready_cv: Condvar,
    shutdown: AtomicBool,
    events: Sender<StoreEvent>,
    queue_soft_bound: usize,
    /// Tasks currently executing on a worker.
    running: AtomicUsize,
}

impl TaskStore {
    /// Creates a store publishing events on `events`.
    #[must_use]
    pub fn new(queue_soft_bound: usize, events: Sender<StoreEvent>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            ready: Mutex::new(VecDeque::new()),
            ready_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            events,
            queue_soft_bound,
            running: AtomicUsize::new(0),
        }
    }

    fn task_arc(&self, key: TaskKey) -> Option<Arc<Mutex<Task>>> {
        self.tasks.lock().unwrap().get(&key).cloned()
    }

    fn push_ready(&self, key: TaskKey) {
        self.ready.lock().unwrap().push_back(key);
        self.ready_cv.notify_one();
    }

    /// Whether a task exists under this key.
    #[must_use]
    pub fn contains(&self, key: TaskKey) -> bool {
        self.tasks.lock().unwrap().contains_key(&key)
    }

    /// Creates (or revisits) the root task of a formula.
    pub fn new_root(&self, originator: NodeId) -> TaskKey {
        let key = TaskKey::new(originator, Path::root());
        let inserted = {
            let mut tasks = self.tasks.lock().unwrap();
            if tasks.contains_key(&key) {
                false
            } else {
                let mut task = Task::new(key, Vec::new(), None);
                task.state = TaskState::Work;
                tasks.insert(key, Arc::new(Mutex::new(task)));
                true
            }
        };
        if inserted {
            tracing::debug!(%key, "registered root task");
            self.push_ready(key);
        }
        key
    }

    /// Registers a task pushed by a peer. Idempotent: a known
    /// `(originator, path)` is left untouched.
    ///
    /// Returns whether a new task was created.
    pub fn insert_pushed(&self, key: TaskKey, cube: Cube, origin_peer: NodeId) -> bool {
        let inserted = {
            let mut tasks = self.tasks.lock().unwrap();
            if tasks.contains_key(&key) {
                false
            } else {
                let mut task = Task::new(key, cube, None);
                task.state = TaskState::Work;
                task.origin_peer = Some(origin_peer);
                tasks.insert(key, Arc::new(Mutex::new(task)));
                true
            }
        };
        if inserted {
            tracing::debug!(%key, peer = origin_peer, "accepted pushed task");
            self.push_ready(key);
        } else {
            tracing::debug!(%key, peer = origin_peer, "duplicate task push ignored");
        }
        inserted
    }

    /// Splits a task into two children, left before right.
    ///
    /// The split literals extend the parent cube; `None` is a structural
    /// split above a pregenerated cube table. Fails with `AlreadyDone` on a
    /// terminal task.
    pub fn split(
        &self,
        key: TaskKey,
        left_lit: Option<Literal>,
        right_lit: Option<Literal>,
    ) -> Result<(TaskKey, TaskKey)> {
        let arc = self.task_arc(key).ok_or_else(|| Error::UnknownTask {
            originator: key.originator,
            path: key.path.to_string(),
        })?;
        let cube = {
            let mut t = arc.lock().unwrap();
            if t.state == TaskState::Done {
                return Err(Error::AlreadyDone);
            }
            t.state = TaskState::WaitChildren;
            if t.assigned_worker.take().is_some() {
                self.running.fetch_sub(1, Ordering::SeqCst);
            }
            t.left_result = None;
            t.right_result = None;
            t.cube.clone()
        };

        let left_key = TaskKey::new(key.originator, key.path.left()?);
        let right_key = TaskKey::new(key.originator, key.path.right()?);

        let mut left_cube = cube.clone();
        if let Some(lit) = left_lit {
            left_cube.push(lit);
        }
        let mut right_cube = cube;
        if let Some(lit) = right_lit {
            right_cube.push(lit);
        }

        let queued = self.ready.lock().unwrap().len();
        let pressured = queued >= self.queue_soft_bound;

        {
            let mut tasks = self.tasks.lock().unwrap();
            let mut left = Task::new(left_key, left_cube, Some(key.path));
            left.state = TaskState::Work;
            let mut right = Task::new(right_key, right_cube, Some(key.path));
            right.state = TaskState::Work;
            right.offloadable = pressured;
            tasks.insert(left_key, Arc::new(Mutex::new(left)));
            tasks.insert(right_key, Arc::new(Mutex::new(right)));
        }

        self.push_ready(left_key);
        self.push_ready(right_key);
        tracing::trace!(%key, ?left_lit, ?right_lit, "split task");

        if pressured {
            let _ = self.events.send(StoreEvent::QueuePressure { queued: queued + 2 });
        }
        Ok((left_key, right_key))
    }

    /// Claims the next ready task for a worker. Blocks until work is
    /// available; returns `None` on shutdown.
    pub fn pop_work(&self, worker: usize) -> Option<WorkItem> {
        let mut ready = self.ready.lock().unwrap();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(key) = ready.pop_front() {
                drop(ready);
                if let Some(item) = self.claim(key, worker) {
                    return Some(item);
                }
                ready = self.ready.lock().unwrap();
                continue;
            }
            ready = self.ready_cv.wait(ready).unwrap();
        }
    }

    /// Claims a key popped from the queue; stale entries yield `None`.
    fn claim(&self, key: TaskKey, worker: usize) -> Option<WorkItem> {
        let arc = self.task_arc(key)?;
        let mut t = arc.lock().unwrap();
        if t.state != TaskState::Work || t.assigned_worker.is_some() {
            return None;
        }
        t.assigned_worker = Some(worker);
        self.running.fetch_add(1, Ordering::SeqCst);
        Some(WorkItem {
            key,
            cube: t.cube.clone(),
            stop: Arc::clone(&t.stop),
        })
    }

    /// Tasks currently executing on workers.
    #[must_use]
    pub fn running_len(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// The assumption literals of a task.
    #[must_use]
    pub fn cube_of(&self, key: TaskKey) -> Option<Cube> {
        let arc = self.task_arc(key)?;
        let t = arc.lock().unwrap();
        Some(t.cube.clone())
    }

    /// Non-blocking probe used by shutdown draining and tests.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.ready.lock().unwrap().len()
    }

    /// Queue sizes per originator, for the status snapshot.
    #[must_use]
    pub fn queued_by_originator(&self) -> HashMap<NodeId, u64> {
        let ready = self.ready.lock().unwrap();
        let mut out: HashMap<NodeId, u64> = HashMap::new();
        for key in ready.iter() {
            *out.entry(key.originator).or_default() += 1;
        }
        out
    }

    /// Completes a task and propagates the result up the tree.
    pub fn complete(
        &self,
        key: TaskKey,
        result: TaskResult,
        witness: Option<Vec<Literal>>,
    ) -> Result<()> {
        let mut cur = key;
        let mut res = result;
        let mut wit = witness;
        loop {
            let arc = self.task_arc(cur).ok_or_else(|| Error::UnknownTask {
                originator: cur.originator,
                path: cur.path.to_string(),
            })?;
            let (parent, origin_peer) = {
                let mut t = arc.lock().unwrap();
                if t.is_frozen() {
                    return Ok(());
                }
                t.state = TaskState::Done;
                t.result = res;
                if t.assigned_worker.take().is_some() {
                    self.running.fetch_sub(1, Ordering::SeqCst);
                }
                t.assigned_peer = None;
                t.witness = wit.clone();
                (t.parent, t.origin_peer)
            };
            tracing::trace!(key = %cur, result = %res, "task done");

            let Some(parent_path) = parent else {
                let event = match origin_peer {
                    Some(peer) => StoreEvent::PushedTaskDone {
                        key: cur,
                        peer,
                        result: res,
                        witness: wit,
                    },
                    None => StoreEvent::RootDone {
                        key: cur,
                        result: res,
                        witness: wit,
                    },
                };
                let _ = self.events.send(event);
                return Ok(());
            };

            let pkey = TaskKey::new(cur.originator, parent_path);
            let parc = self.task_arc(pkey).ok_or_else(|| Error::UnknownTask {
                originator: pkey.originator,
                path: pkey.path.to_string(),
            })?;

            let went_left = !cur.path.last_bit();
            let sibling_key = TaskKey::new(cur.originator, parent_path.extend(went_left)?);

            enum Next {
                Ascend(TaskResult),
                Retry(Vec<TaskKey>),
                Settled,
            }

            let next = {
                let mut p = parc.lock().unwrap();
                if p.state == TaskState::Done {
                    return Ok(());
                }
                if went_left {
                    p.left_result = Some(res);
                } else {
                    p.right_result = Some(res);
                }
                if res == TaskResult::Sat {
                    // SAT short-circuits: close the parent now, the sibling
                    // subtree is cancelled below.
                    Next::Ascend(TaskResult::Sat)
                } else {
                    match (p.left_result, p.right_result) {
                        (Some(l), Some(r)) => match reduce(l, r) {
                            Reduction::Done(parent_result) => Next::Ascend(parent_result),
                            Reduction::Wait => {
                                let mut retry = Vec::new();
                                if !l.is_terminal() {
                                    p.left_result = None;
                                    retry.push(TaskKey::new(pkey.originator, pkey.path.left()?));
                                }
                                if !r.is_terminal() {
                                    p.right_result = None;
                                    retry.push(TaskKey::new(pkey.originator, pkey.path.right()?));
                                }
                                Next::Retry(retry)
                            }
                        },
                        _ => Next::Settled,
                    }
                }
            };

            match next {
                Next::Ascend(parent_result) => {
                    if res == TaskResult::Sat {
                        self.abort_subtree(sibling_key);
                    }
                    cur = pkey;
                    res = parent_result;
                    if parent_result != TaskResult::Sat {
                        wit = None;
                    }
                }
                Next::Retry(keys) => {
                    for k in &keys {
                        self.requeue_for_retry(*k);
                    }
                    return Ok(());
                }
                Next::Settled => return Ok(()),
            }
        }
    }

    /// Resets a non-terminal child for another attempt: its stale subtree is
    /// dropped and the task goes back to the ready queue.
    fn requeue_for_retry(&self, key: TaskKey) {
        {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.retain(|k, _| {
                !(k.originator == key.originator
                    && key.path.is_prefix_of(k.path)
                    && k.path != key.path)
            });
        }
        let Some(arc) = self.task_arc(key) else {
            return;
        };
        {
            let mut t = arc.lock().unwrap();
            t.state = TaskState::Work;
            t.result = TaskResult::Unknown;
            t.left_result = None;
            t.right_result = None;
            t.assigned_worker = None;
            t.assigned_peer = None;
            t.witness = None;
            t.stop = Arc::new(AtomicBool::new(false));
        }
        tracing::debug!(%key, "requeued task for retry");
        self.push_ready(key);
    }

    /// Marks a queued task as offloaded to `peer`.
    ///
    /// Returns whether the task was eligible (queued, unassigned, not done).
    pub fn assign_remote(&self, key: TaskKey, peer: NodeId) -> Result<bool> {
        self.ready.lock().unwrap().retain(|k| *k != key);
        let arc = self.task_arc(key).ok_or_else(|| Error::UnknownTask {
            originator: key.originator,
            path: key.path.to_string(),
        })?;
        let mut t = arc.lock().unwrap();
        if t.state != TaskState::Work || t.assigned_worker.is_some() {
            return Ok(false);
        }
        t.state = TaskState::Offloaded;
        t.assigned_peer = Some(peer);
        tracing::debug!(%key, peer, "task offloaded");
        Ok(true)
    }

    /// Returns an offloaded task to the local ready queue.
    pub fn reclaim(&self, key: TaskKey) -> Result<bool> {
        let arc = self.task_arc(key).ok_or_else(|| Error::UnknownTask {
            originator: key.originator,
            path: key.path.to_string(),
        })?;
        let reclaimed = {
            let mut t = arc.lock().unwrap();
            if t.state != TaskState::Offloaded {
                false
            } else {
                t.state = TaskState::Work;
                t.assigned_peer = None;
                true
            }
        };
        if reclaimed {
            tracing::debug!(%key, "reclaimed offloaded task");
            self.ready.lock().unwrap().push_front(key);
            self.ready_cv.notify_one();
        }
        Ok(reclaimed)
    }

    /// Reclaims every task offloaded to a now-dead peer.
    pub fn reclaim_all_from(&self, peer: NodeId) -> Vec<TaskKey> {
        let keys: Vec<TaskKey> = {
            let tasks = self.tasks.lock().unwrap();
            tasks.keys().copied().collect()
        };
        let mut reclaimed = Vec::new();
        for key in keys {
            let Some(arc) = self.task_arc(key) else {
                continue;
            };
            let matches = {
                let t = arc.lock().unwrap();
                t.state == TaskState::Offloaded && t.assigned_peer == Some(peer)
            };
            if matches && self.reclaim(key).unwrap_or(false) {
                reclaimed.push(key);
            }
        }
        reclaimed
    }

    /// Picks a queued task for offloading, newest first.
    #[must_use]
    pub fn take_offload_candidate(&self) -> Option<TaskKey> {
        self.ready.lock().unwrap().pop_back()
    }

    /// Puts an untaken offload candidate back.
    pub fn restore_offload_candidate(&self, key: TaskKey) {
        self.ready.lock().unwrap().push_back(key);
        self.ready_cv.notify_one();
    }

    /// Sets the stop flag on a task and all its descendants.
    pub fn abort_subtree(&self, key: TaskKey) {
        let arcs: Vec<Arc<Mutex<Task>>> = {
            let tasks = self.tasks.lock().unwrap();
            tasks
                .iter()
                .filter(|(k, _)| k.originator == key.originator && key.path.is_prefix_of(k.path))
                .map(|(_, v)| Arc::clone(v))
                .collect()
        };
        for arc in arcs {
            let t = arc.lock().unwrap();
            if t.state != TaskState::Done {
                t.stop.store(true, Ordering::SeqCst);
            }
        }
        tracing::debug!(%key, "aborted subtree");
    }

    /// Drops a finished subtree after its verdict was reported.
    pub fn remove_subtree(&self, key: TaskKey) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|k, _| !(k.originator == key.originator && key.path.is_prefix_of(k.path)));
    }

    /// Snapshot of a task's public state, for tests and introspection.
    #[must_use]
    pub fn snapshot(&self, key: TaskKey) -> Option<(TaskState, TaskResult)> {
        let arc = self.task_arc(key)?;
        let t = arc.lock().unwrap();
        Some((t.state, t.result))
    }

    /// Witness literals of a task, present after a SAT completion.
    #[must_use]
    pub fn witness(&self, key: TaskKey) -> Option<Vec<Literal>> {
        let arc = self.task_arc(key)?;
        let t = arc.lock().unwrap();
        t.witness.clone()
    }

    /// Wakes all workers, makes `pop_work` return `None` and cancels every
    /// engine still running on a live task.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let arcs: Vec<Arc<Mutex<Task>>> = {
            let tasks = self.tasks.lock().unwrap();
            tasks.values().cloned().collect()
        };
        for arc in arcs {
            let t = arc.lock().unwrap();
            if t.state != TaskState::Done {
                t.stop.store(true, Ordering::SeqCst);
            }
        }
        self.ready_cv.notify_all();
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn store() -> (TaskStore, crossbeam_channel::Receiver<StoreEvent>) {
        let (tx, rx) = unbounded();
        (TaskStore::new(64, tx), rx)
    }

    #[test]
    fn test_root_solved_directly() {
        let (store, rx) = store();
        let root = store.new_root(1);
        let item = store.pop_work(0).unwrap();
        assert_eq!(item.key, root);
        store
            .complete(root, TaskResult::Sat, Some(vec![1]))
            .unwrap();
        match rx.try_recv().unwrap() {
            StoreEvent::RootDone { result, witness, .. } => {
                assert_eq!(result, TaskResult::Sat);
                assert_eq!(witness, Some(vec![1]));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_split_and_reduce_unsat() {
        let (store, rx) = store();
        let root = store.new_root(1);
        let _ = store.pop_work(0).unwrap();
        let (l, r) = store.split(root, Some(3), Some(-3)).unwrap();
        assert_eq!(store.snapshot(root).unwrap().0, TaskState::WaitChildren);

        store.complete(l, TaskResult::Unsat, None).unwrap();
        assert_eq!(store.snapshot(root).unwrap().0, TaskState::WaitChildren);
        store.complete(r, TaskResult::Unsat, None).unwrap();
        match rx.try_recv().unwrap() {
            StoreEvent::RootDone { result, .. } => assert_eq!(result, TaskResult::Unsat),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_sat_short_circuits_running_sibling() {
        let (store, rx) = store();
        let root = store.new_root(1);
        let _ = store.pop_work(0).unwrap();
        let (l, r) = store.split(root, Some(2), Some(-2)).unwrap();

        // Only the left child reports; the right is still queued.
        store.complete(l, TaskResult::Sat, Some(vec![2])).unwrap();
        match rx.try_recv().unwrap() {
            StoreEvent::RootDone { result, witness, .. } => {
                assert_eq!(result, TaskResult::Sat);
                assert_eq!(witness, Some(vec![2]));
            }
            other => panic!("unexpected event {other:?}"),
        }
        // The sibling was told to stop.
        let item = store.pop_work(0).unwrap();
        assert_eq!(item.key, r);
        assert!(item.stop.load(Ordering::SeqCst));
        // A frozen root ignores late results.
        store.complete(r, TaskResult::Unsat, None).unwrap();
        assert_eq!(store.snapshot(root).unwrap().1, TaskResult::Sat);
    }

    #[test]
    fn test_wait_cell_requeues_aborted_child() {
        let (store, _rx) = store();
        let root = store.new_root(1);
        let _ = store.pop_work(0).unwrap();
        let (l, r) = store.split(root, Some(2), Some(-2)).unwrap();

        store.complete(l, TaskResult::Unsat, None).unwrap();
        store.complete(r, TaskResult::Aborted, None).unwrap();

        // The aborted child is back in Work; the parent keeps waiting.
        assert_eq!(store.snapshot(r).unwrap().0, TaskState::Work);
        assert_eq!(store.snapshot(root).unwrap().0, TaskState::WaitChildren);

        // Retry succeeds this time.
        store.complete(r, TaskResult::Unsat, None).unwrap();
        assert_eq!(store.snapshot(root).unwrap().1, TaskResult::Unsat);
    }

    #[test]
    fn test_both_aborted_reduce_to_unknown() {
        let (store, rx) = store();
        let root = store.new_root(1);
        let _ = store.pop_work(0).unwrap();
        let (l, r) = store.split(root, Some(2), Some(-2)).unwrap();
        store.complete(l, TaskResult::Aborted, None).unwrap();
        store.complete(r, TaskResult::Aborted, None).unwrap();
        match rx.try_recv().unwrap() {
            StoreEvent::RootDone { result, .. } => assert_eq!(result, TaskResult::Unknown),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_split_terminal_task_fails() {
        let (store, _rx) = store();
        let root = store.new_root(1);
        store.complete(root, TaskResult::Unsat, None).unwrap();
        assert!(matches!(
            store.split(root, Some(1), Some(-1)),
            Err(Error::AlreadyDone)
        ));
    }

    #[test]
    fn test_pushed_task_reports_to_peer() {
        let (store, rx) = store();
        let key = TaskKey::new(9, Path::root().left().unwrap());
        assert!(store.insert_pushed(key, vec![-4], 42));
        // Idempotent on duplicate push.
        assert!(!store.insert_pushed(key, vec![-4], 42));

        store.complete(key, TaskResult::Unsat, None).unwrap();
        match rx.try_recv().unwrap() {
            StoreEvent::PushedTaskDone { peer, result, .. } => {
                assert_eq!(peer, 42);
                assert_eq!(result, TaskResult::Unsat);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_offload_and_reclaim() {
        let (store, _rx) = store();
        let root = store.new_root(1);
        let _ = store.pop_work(0).unwrap();
        let (l, _r) = store.split(root, Some(2), Some(-2)).unwrap();

        let candidate = store.take_offload_candidate().unwrap();
        assert!(store.assign_remote(candidate, 7).unwrap());
        assert_eq!(store.snapshot(candidate).unwrap().0, TaskState::Offloaded);

        // Peer dies: the task comes home and is runnable again.
        let reclaimed = store.reclaim_all_from(7);
        assert_eq!(reclaimed, vec![candidate]);
        assert_eq!(store.snapshot(candidate).unwrap().0, TaskState::Work);

        // The untouched sibling is still claimable.
        let next = store.pop_work(0).unwrap();
        assert!(next.key == l || next.key == candidate);
    }

    #[test]
    fn test_assign_remote_skips_claimed_task() {
        let (store, _rx) = store();
        let root = store.new_root(1);
        let item = store.pop_work(0).unwrap();
        // Task is running on a worker; offloading it must be refused.
        assert!(!store.assign_remote(item.key, 7).unwrap());
        assert_eq!(store.snapshot(root).unwrap().0, TaskState::Work);
    }

    #[test]
    fn test_abort_subtree_sets_stop_flags() {
        let (store, _rx) = store();
        let root = store.new_root(1);
        let _ = store.pop_work(0).unwrap();
        let (l, _r) = store.split(root, Some(2), Some(-2)).unwrap();
        let (ll, _lr) = store.split(l, Some(3), Some(-3)).unwrap();

        store.abort_subtree(l);
        let item = store.pop_work(0).unwrap();
        assert_eq!(item.key, ll);
        assert!(item.stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_unblocks_pop() {
        let (store, _rx) = store();
        let store = Arc::new(store);
        let s = Arc::clone(&store);
        let handle = std::thread::spawn(move || s.pop_work(0));
        std::thread::sleep(std::time::Duration::from_millis(50));
        store.shutdown();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn test_queue_accounting() {
        let (store, _rx) = store();
        let root = store.new_root(5);
        assert_eq!(store.queued_len(), 1);
        let _ = store.pop_work(0).unwrap();
        let _ = store.split(root, Some(1), Some(-1)).unwrap();
        let by_orig = store.queued_by_originator();
        assert_eq!(by_orig.get(&5), Some(&2));
    }
}
