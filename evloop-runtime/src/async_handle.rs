//! The async handle: the one operation safe to call from any thread.
//!
//! `send` atomically sets a pending flag and, only on the clear→set edge,
//! performs a single OS-level wakeup of the loop's poller. The loop's
//! "process async" phase clears the flag and fires the callback — coalescing
//! falls out naturally because the flag is boolean, not a counter.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use evloop_driver::NotifyHandle;
use evloop_log::instrument;

use crate::{
    error::{Error, Result},
    handle::{AsyncState, HandleId, HandleKind},
    loop_core::Loop,
};

/// A thread-safe sender bound to one async handle. Cloneable and `Send`;
/// this is the only piece of this crate's public surface meant to cross a
/// thread boundary.
#[derive(Clone)]
pub struct AsyncSender {
    pending: Arc<AtomicBool>,
    notify: NotifyHandle,
}

impl AsyncSender {
    /// Mark the handle pending and, if it was not already, wake the loop.
    /// Safe to call from any thread, any number of times, even after the
    /// handle has been closed (a send racing a close is observed-or-dropped,
    /// never a use-after-free, since this only touches the shared flag and
    /// the poller's wakeup primitive).
    pub fn send(&self) -> Result<()> {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.notify.notify().map_err(|_| Error::Invariant("notify backend gone"))?;
        }
        Ok(())
    }
}

impl Loop {
    /// Initialize an async handle with its callback. Internal-use handles
    /// (e.g. the threadpool completion watcher) should `unref` immediately
    /// after so they don't by themselves keep the loop alive.
    pub fn async_init(&self, callback: impl FnMut(HandleId) + 'static) -> HandleId {
        instrument!(evloop_log::Level::TRACE, "async_init");
        let pending = Arc::new(AtomicBool::new(false));
        let mut inner = self.inner.borrow_mut();
        let id = inner.registry.init(HandleKind::Async(AsyncState {
            pending,
            callback: Some(Box::new(callback)),
        }));
        inner.registry.start(id).expect("fresh handle cannot be closing");
        id
    }

    /// Obtain a thread-safe sender for a previously-initialized async
    /// handle.
    pub fn async_sender(&self, id: HandleId) -> Result<AsyncSender> {
        let inner = self.inner.borrow();
        let rec = inner.registry.get(id).ok_or(Error::InvalidArgument)?;
        match &rec.kind {
            HandleKind::Async(state) => Ok(AsyncSender {
                pending: state.pending.clone(),
                notify: inner.notify_handle.clone(),
            }),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Run the "process async" phase: every async handle whose pending flag
    /// is set has it cleared and its callback invoked, once.
    pub(crate) fn run_async_phase(&self) {
        let ids: Vec<HandleId> = {
            let inner = self.inner.borrow();
            inner
                .registry
                .slab
                .iter()
                .filter_map(|(id, rec)| match &rec.kind {
                    HandleKind::Async(state) if rec.flags.is_active() => {
                        if state.pending.swap(false, Ordering::AcqRel) {
                            Some(id)
                        } else {
                            None
                        }
                    }
                    _ => None,
                })
                .collect()
        };
        for id in ids {
            let mut cb = {
                let mut inner = self.inner.borrow_mut();
                match inner.registry.get_mut(id) {
                    Some(rec) => match &mut rec.kind {
                        HandleKind::Async(state) => state.callback.take(),
                        _ => None,
                    },
                    None => None,
                }
            };
            if let Some(cb) = &mut cb {
                cb(id);
            }
            let mut inner = self.inner.borrow_mut();
            if let Some(rec) = inner.registry.get_mut(id) {
                if let HandleKind::Async(state) = &mut rec.kind {
                    state.callback = cb;
                }
            }
        }
    }
}
