//! A fixed-size pool of worker threads that perform blocking operations on
//! behalf of an event loop.
//!
//! The pool is intentionally dumb: one FIFO queue, one mutex, one condition
//! variable. It knows nothing about loops, handles, or requests — it runs
//! `FnOnce() + Send` jobs and, on request, cancels a job that has not yet
//! been claimed by a worker. The caller (typically the loop's work-request
//! machinery) is responsible for composing each job so that it posts its own
//! completion back to whichever loop is waiting on it.

#![warn(missing_docs)]

use std::{
    collections::VecDeque,
    env,
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    thread::JoinHandle,
};

use evloop_log::{instrument, trace};

const DEFAULT_WORKERS: usize = 4;
const MIN_WORKERS: usize = 1;
const MAX_WORKERS: usize = 128;

/// The environment variable that overrides the worker count. Earlier
/// prototypes of this pool also accepted a differently-cased spelling; this
/// is the one the library documents and guarantees.
pub const THREADPOOL_SIZE_VAR: &str = "EVLOOP_THREADPOOL_SIZE";

/// Opaque identifier for one submitted unit of work, returned by
/// [`ThreadPool::submit`] and later passed to [`ThreadPool::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkId(u64);

/// Outcome of a [`ThreadPool::cancel`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued and has been removed; it will never run.
    Cancelled,
    /// The job was already claimed by a worker (or already ran); cancellation
    /// has no effect on it.
    Busy,
}

type Job = Box<dyn FnOnce() + Send>;

struct QueueEntry {
    id: WorkId,
    job: Job,
}

struct Shared {
    queue: Mutex<VecDeque<QueueEntry>>,
    condvar: Condvar,
    idle_workers: Mutex<usize>,
    shutting_down: Mutex<bool>,
    next_id: AtomicU64,
}

impl Shared {
    fn next_work_id(&self) -> WorkId {
        WorkId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// A fixed pool of worker threads draining a single FIFO work queue.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

fn worker_count_from_env() -> usize {
    env::var(THREADPOOL_SIZE_VAR)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_WORKERS)
        .clamp(MIN_WORKERS, MAX_WORKERS)
}

fn worker_main(shared: Arc<Shared>) {
    loop {
        let entry = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(entry) = queue.pop_front() {
                    break Some(entry);
                }
                if *shared.shutting_down.lock().unwrap() {
                    break None;
                }
                *shared.idle_workers.lock().unwrap() += 1;
                queue = shared.condvar.wait(queue).unwrap();
                *shared.idle_workers.lock().unwrap() -= 1;
            }
        };
        match entry {
            Some(entry) => {
                trace!("running work {:?}", entry.id);
                (entry.job)();
            }
            None => {
                // Wake one more worker so the shutdown signal propagates
                // through the whole pool, then exit for good.
                shared.condvar.notify_one();
                break;
            }
        }
    }
}

impl ThreadPool {
    /// Create a pool sized from [`THREADPOOL_SIZE_VAR`], clamped to
    /// `[1, 128]`, defaulting to 4.
    pub fn new() -> Self {
        Self::with_workers(worker_count_from_env())
    }

    /// Create a pool with an explicit worker count, clamped to `[1, 128]`.
    pub fn with_workers(count: usize) -> Self {
        let count = count.clamp(MIN_WORKERS, MAX_WORKERS);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            idle_workers: Mutex::new(0),
            shutting_down: Mutex::new(false),
            next_id: AtomicU64::new(0),
        });
        let workers = (0..count)
            .map(|_| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name("evloop-worker".into())
                    .spawn(move || worker_main(shared))
                    .expect("failed to spawn threadpool worker")
            })
            .collect();
        Self { shared, workers }
    }

    /// Number of worker threads in the pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Submit a job to the FIFO queue. Wakes one idle worker if any is
    /// waiting.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> WorkId {
        instrument!(evloop_log::Level::TRACE, "submit");
        let id = self.shared.next_work_id();
        let mut queue = self.shared.queue.lock().unwrap();
        queue.push_back(QueueEntry {
            id,
            job: Box::new(job),
        });
        if *self.shared.idle_workers.lock().unwrap() > 0 {
            self.shared.condvar.notify_one();
        }
        id
    }

    /// Cancel `id` if it is still sitting in the queue, running `on_cancel`
    /// in its place instead of the original job. Work already claimed by a
    /// worker cannot be cancelled.
    pub fn cancel(&self, id: WorkId, on_cancel: impl FnOnce() + Send + 'static) -> CancelOutcome {
        instrument!(evloop_log::Level::TRACE, "cancel", ?id);
        let mut queue = self.shared.queue.lock().unwrap();
        if let Some(pos) = queue.iter().position(|entry| entry.id == id) {
            queue.remove(pos);
            drop(queue);
            on_cancel();
            CancelOutcome::Cancelled
        } else {
            CancelOutcome::Busy
        }
    }

    /// Signal every worker to exit once the queue drains, and join them all.
    /// Jobs still queued when this is called are dropped without running.
    pub fn shutdown(mut self) {
        *self.shared.shutting_down.lock().unwrap() = true;
        self.shared.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        *self.shared.shutting_down.lock().unwrap() = true;
        self.shared.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn runs_submitted_work() {
        let pool = ThreadPool::with_workers(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std::sync::mpsc::channel();
        for _ in 0..8 {
            let counter = counter.clone();
            let tx = tx.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..8 {
            rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn cancel_before_claim_never_runs_job() {
        // Saturate the single worker with a blocking job, then queue a
        // second job and cancel it before the worker can claim it.
        let pool = ThreadPool::with_workers(1);
        let (start_tx, start_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        pool.submit(move || {
            start_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        start_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        let id = pool.submit(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        let cancelled = Arc::new(AtomicUsize::new(0));
        let cancelled_clone = cancelled.clone();
        let outcome = pool.cancel(id, move || {
            cancelled_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(outcome, CancelOutcome::Cancelled);

        release_tx.send(()).unwrap();
        pool.shutdown();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_after_claim_reports_busy() {
        let pool = ThreadPool::with_workers(1);
        let (start_tx, start_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let id_holder = std::sync::Mutex::new(None);
        let id = pool.submit(move || {
            start_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        *id_holder.lock().unwrap() = Some(id);
        start_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();

        let outcome = pool.cancel(id, || {});
        assert_eq!(outcome, CancelOutcome::Busy);

        release_tx.send(()).unwrap();
        pool.shutdown();
    }

    #[test]
    fn worker_count_clamped() {
        assert_eq!(ThreadPool::with_workers(0).worker_count(), MIN_WORKERS);
        assert_eq!(ThreadPool::with_workers(1000).worker_count(), MAX_WORKERS);
    }
}
