//! Worker threads for CPU-side maintenance
//!
//! Jobs are sent to a fixed set of workers over a crossbeam channel. Stages
//! that depend on each other are joined with a [`Synchronizer`], which raises
//! a [`Flag`] once every job of the stage has finished.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A level-triggered signal threads can block on
#[derive(Default)]
pub struct Flag {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Flag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        *self.raised.lock() = true;
        self.cond.notify_all();
    }

    pub fn lower(&self) {
        *self.raised.lock() = false;
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Block until the flag is raised
    pub fn wait(&self) {
        let mut raised = self.raised.lock();
        while !*raised {
            self.cond.wait(&mut raised);
        }
    }
}

/// Counts down outstanding jobs and raises its flag at zero
pub struct Synchronizer {
    remaining: AtomicUsize,
    flag: Arc<Flag>,
}

impl Synchronizer {
    pub fn new(count: usize, flag: Arc<Flag>) -> Self {
        if count == 0 {
            flag.raise();
        }
        Synchronizer {
            remaining: AtomicUsize::new(count),
            flag,
        }
    }

    pub fn decrement(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.flag.raise();
        }
    }
}

/// Decrements its synchronizer when dropped, also while unwinding
struct CountDown(Arc<Synchronizer>);

impl Drop for CountDown {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

pub struct TaskExecutor {
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskExecutor {
    /// Spawn `worker_count` workers; zero runs every job on the caller's thread
    pub fn new(worker_count: usize) -> std::io::Result<Self> {
        let (job_tx, job_rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("render-task-{}", worker_id))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            tracing::error!("Task panicked on worker {}", worker_id);
                        }
                    }
                })?;
            workers.push(handle);
        }

        tracing::debug!("Started task executor with {} workers", worker_count);
        Ok(TaskExecutor {
            job_tx: Some(job_tx),
            workers,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn execute(&self, job: impl FnOnce() + Send + 'static) {
        match &self.job_tx {
            Some(tx) if !self.workers.is_empty() => {
                if let Err(err) = tx.send(Box::new(job)) {
                    // Workers are gone, run it here instead
                    (err.into_inner())();
                }
            }
            _ => job(),
        }
    }

    /// Run `f` over every item in parallel and return the results in input order
    pub fn run_all<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        if self.workers.is_empty() || items.len() <= 1 {
            return items.into_iter().map(f).collect();
        }

        let count = items.len();
        let f = Arc::new(f);
        let flag = Arc::new(Flag::new());
        let sync = Arc::new(Synchronizer::new(count, Arc::clone(&flag)));
        let (result_tx, result_rx) = unbounded();

        for (index, item) in items.into_iter().enumerate() {
            let f = Arc::clone(&f);
            let count_down = CountDown(Arc::clone(&sync));
            let result_tx = result_tx.clone();
            self.execute(move || {
                let _count_down = count_down;
                let _ = result_tx.send((index, f(item)));
            });
        }

        flag.wait();
        let mut results: Vec<(usize, R)> = result_rx.try_iter().collect();
        if results.len() != count {
            panic!("{} of {} tasks panicked", count - results.len(), count);
        }
        results.sort_unstable_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        // Closing the channel lets every worker's recv loop finish
        self.job_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
