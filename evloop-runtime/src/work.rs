//! The threadpool bridge: `queue_work`/`cancel_work` submit and cancel
//! blocking operations on the process-wide [`evloop_threadpool::ThreadPool`].
//! Completion hand-off routes results back onto this loop's thread through
//! an internal async handle private to each loop.
//!
//! `fs`, `getaddrinfo`, and `getnameinfo` requests are thin convenience
//! wrappers over `queue_work`; the concrete syscalls they'd issue are
//! outside this crate, so they're provided as closures the caller supplies.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use evloop_log::instrument;
use once_cell::sync::OnceCell;
use slab::Slab;

use crate::{
    error::{Error, Result},
    handle::HandleId,
    loop_core::Loop,
};

static GLOBAL_POOL: OnceCell<evloop_threadpool::ThreadPool> = OnceCell::new();

fn global_pool() -> &'static evloop_threadpool::ThreadPool {
    GLOBAL_POOL.get_or_init(evloop_threadpool::ThreadPool::new)
}

/// Status delivered to a work's done callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// The work function ran to completion.
    Ok,
    /// The work was cancelled before a worker claimed it; the work function
    /// never ran.
    Cancelled,
}

/// Identifies one outstanding `queue_work` call for [`Loop::cancel_work`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkId(usize);

struct PendingWork {
    pool_id: Option<evloop_threadpool::WorkId>,
    done: Option<Box<dyn FnOnce(WorkStatus)>>,
}

struct CompletionItem {
    id: usize,
    status: WorkStatus,
}

/// Per-loop state backing the threadpool bridge.
pub(crate) struct WorkBridge {
    pending: Slab<PendingWork>,
    queue: Arc<SegQueue<CompletionItem>>,
    pub(crate) completion_async: HandleId,
}

impl WorkBridge {
    pub(crate) fn new(completion_async: HandleId) -> Self {
        Self {
            pending: Slab::new(),
            queue: Arc::new(SegQueue::new()),
            completion_async,
        }
    }
}

impl Loop {
    /// Submit `work_fn` to the process-wide threadpool; `done` runs on this
    /// loop's thread once `work_fn` completes or is cancelled.
    pub fn queue_work(
        &self,
        work_fn: impl FnOnce() + Send + 'static,
        done: impl FnOnce(WorkStatus) + 'static,
    ) -> Result<WorkId> {
        instrument!(evloop_log::Level::TRACE, "queue_work");
        let sender = self.async_sender({
            let inner = self.inner.borrow();
            inner.work.completion_async
        })?;
        let queue = self.inner.borrow().work.queue.clone();
        let slot = self.inner.borrow_mut().work.pending.insert(PendingWork {
            pool_id: None,
            done: Some(Box::new(done)),
        });
        self.inner.borrow_mut().requests.begin(crate::request::RequestKind::Work);

        let completion_queue = queue.clone();
        let pool_id = global_pool().submit(move || {
            work_fn();
            completion_queue.push(CompletionItem { id: slot, status: WorkStatus::Ok });
            let _ = sender.send();
        });
        self.inner.borrow_mut().work.pending[slot].pool_id = Some(pool_id);
        Ok(WorkId(slot))
    }

    /// Cancel a queued work item. Returns an error if it has already been
    /// claimed by a worker (or already completed) — matching the "busy"
    /// outcome from the threadpool.
    pub fn cancel_work(&self, id: WorkId) -> Result<()> {
        instrument!(evloop_log::Level::TRACE, "cancel_work", ?id.0);
        let pool_id = {
            let inner = self.inner.borrow();
            inner
                .work
                .pending
                .get(id.0)
                .and_then(|p| p.pool_id)
                .ok_or(Error::InvalidArgument)?
        };
        let queue = self.inner.borrow().work.queue.clone();
        let sender = self.async_sender({
            let inner = self.inner.borrow();
            inner.work.completion_async
        })?;
        let slot = id.0;
        let outcome = global_pool().cancel(pool_id, move || {
            queue.push(CompletionItem { id: slot, status: WorkStatus::Cancelled });
            let _ = sender.send();
        });
        match outcome {
            evloop_threadpool::CancelOutcome::Cancelled => Ok(()),
            evloop_threadpool::CancelOutcome::Busy => Err(Error::AlreadyInUse),
        }
    }

    /// Drain every completed/cancelled work item queued since the last
    /// drain, invoking each done callback on this (the loop) thread. Wired
    /// as the completion async handle's callback.
    pub(crate) fn drain_work_completions(&self) {
        loop {
            let item = {
                let inner = self.inner.borrow();
                inner.work.queue.pop()
            };
            let Some(item) = item else { break };
            let done = {
                let mut inner = self.inner.borrow_mut();
                inner.work.pending.try_remove(item.id).and_then(|p| p.done)
            };
            let _ = self.inner.borrow_mut().requests.finish();
            if let Some(done) = done {
                done(item.status);
            }
        }
    }
}
