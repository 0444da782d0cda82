//! Thread-group dispatch (spec.md §4.8 C8).
//!
//! A fixed worker pool claims batches of a single divisible [`WorkItem`] via
//! atomic fetch-add, so batch assignment needs no locking on the hot path;
//! whichever worker's fetch-add claims the last batch runs the one
//! completion callback. [`FlagBarrier`] is the separate, lower-level
//! primitive spec.md §4.8 calls out for "wait until every one of N flags is
//! set" (e.g. every worker has observed a shutdown request).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

/// A single divisible unit of dispatched work: `total` items split into
/// batches of (at most) `batch_size`.
#[derive(Clone, Copy, Debug)]
pub struct WorkItem {
    pub total: usize,
    pub batch_size: usize,
}

impl WorkItem {
    /// Picks a batch size that spreads `total` items over roughly
    /// `worker_count` batches, with a floor of 1 (spec.md §4.8 "auto batch
    /// size").
    pub fn auto(total: usize, worker_count: usize) -> Self {
        let batch_size = (total / worker_count.max(1)).max(1);
        WorkItem { total, batch_size }
    }

    fn batch_count(&self) -> usize {
        if self.total == 0 {
            0
        } else {
            self.total.div_ceil(self.batch_size)
        }
    }
}

/// `fn(index, worker_index)`, called once per `index` in `[0, total)`
/// (spec.md §4.8).
type WorkFn = Arc<dyn Fn(usize, usize) + Send + Sync>;
/// `fn(worker_index)`, called exactly once, from whichever worker finishes
/// the last index.
type CompletionFn = Box<dyn FnOnce(usize) + Send>;

struct Job {
    work: WorkFn,
    item: WorkItem,
    next_batch: AtomicUsize,
    completed_batches: AtomicUsize,
    on_complete: Mutex<Option<CompletionFn>>,
}

enum Message {
    Work(Arc<Job>),
    Shutdown,
}

/// A fixed pool of worker threads dispatching divisible work (spec.md
/// §4.8).
pub struct ThreadGroup {
    sender: Sender<Message>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadGroup {
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver): (Sender<Message>, Receiver<Message>) = crossbeam_channel::unbounded();

        let workers = (0..worker_count)
            .map(|i| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("thread-group-{i}"))
                    .spawn(move || worker_loop(i, receiver))
                    .expect("failed to spawn thread-group worker")
            })
            .collect();

        ThreadGroup { sender, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Dispatches `item`, running `work(index, worker_index)` once for every
    /// `index` in `[0, item.total)` across the pool, then invoking
    /// `on_complete(worker_index)` exactly once, from whichever worker
    /// completes the final index (spec.md §4.8 "single completion
    /// callback").
    pub fn dispatch(
        &self,
        item: WorkItem,
        work: impl Fn(usize, usize) + Send + Sync + 'static,
        on_complete: impl FnOnce(usize) + Send + 'static,
    ) {
        if item.batch_count() == 0 {
            on_complete(0);
            return;
        }
        let job = Arc::new(Job {
            work: Arc::new(work),
            item,
            next_batch: AtomicUsize::new(0),
            completed_batches: AtomicUsize::new(0),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
        });
        // One wake-up message per worker; each worker then independently
        // claims batches from the shared atomic counter until exhausted.
        for _ in 0..self.workers.len() {
            let _ = self.sender.send(Message::Work(job.clone()));
        }
    }

    pub fn shutdown(mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Message::Shutdown);
        }
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

fn worker_loop(worker_index: usize, receiver: Receiver<Message>) {
    while let Ok(message) = receiver.recv() {
        match message {
            Message::Shutdown => break,
            Message::Work(job) => run_claimed_batches(worker_index, &job),
        }
    }
}

/// Claims batches from `job`'s shared atomic counter until exhausted,
/// running `work(index, worker_index)` once for every index in each claimed
/// batch (spec.md §4.8's work item is per-index, not per-batch; batching
/// only controls how many indices a worker claims per round).
fn run_claimed_batches(worker_index: usize, job: &Job) {
    let batch_count = job.item.batch_count();
    loop {
        let batch_index = job.next_batch.fetch_add(1, Ordering::Relaxed);
        if batch_index >= batch_count {
            return;
        }
        let start = batch_index * job.item.batch_size;
        let len = job.item.batch_size.min(job.item.total - start);
        for index in start..start + len {
            (job.work)(index, worker_index);
        }

        if job.completed_batches.fetch_add(1, Ordering::AcqRel) + 1 == batch_count {
            if let Some(cb) = job.on_complete.lock().unwrap().take() {
                cb(worker_index);
            }
            return;
        }
    }
}

/// Blocks until every one of `count` flags has been `set` (spec.md §4.8
/// "flag-barrier construct").
pub struct FlagBarrier {
    state: Mutex<Vec<bool>>,
    condvar: Condvar,
}

impl FlagBarrier {
    pub fn new(count: usize) -> Self {
        FlagBarrier {
            state: Mutex::new(vec![false; count]),
            condvar: Condvar::new(),
        }
    }

    pub fn set(&self, index: usize) {
        let mut state = self.state.lock().unwrap();
        state[index] = true;
        if state.iter().all(|&f| f) {
            self.condvar.notify_all();
        }
    }

    pub fn wait_all(&self) {
        let state = self.state.lock().unwrap();
        let _guard = self
            .condvar
            .wait_while(state, |state| !state.iter().all(|&f| f))
            .unwrap();
    }
}
