//! The event loop driver: phase sequencer, liveness/stop semantics, and the
//! `Loop` handle applications hold.
//!
//! Each iteration runs ten ordered phases: update the clock, run due
//! timers, drain pending callbacks, run idle handles, run prepare handles,
//! compute the poll timeout, poll for I/O, run check handles, run close
//! callbacks, and finally re-run timers once more so a single `ONCE`
//! iteration still observes timers that became due during polling.
//!
//! State lives in [`LoopInner`] behind an `Rc<RefCell<..>>` — this crate is
//! single-threaded by design (the only cross-thread doors are the async
//! handle and the threadpool completion queue), so interior mutability
//! without atomics is the idiomatic shape, not a shortcut.

use std::{
    cell::RefCell,
    rc::Rc,
    time::{Duration, Instant},
};

use evloop_driver::{PollBackend, Poller, RawFd};
use evloop_log::instrument;

use crate::{
    error::{Error, Result},
    handle::{HandleId, HandleKind, Registry},
    request::RequestRegistry,
    timer_heap::TimerHeap,
    work::WorkBridge,
};

/// How long `run` keeps iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run until the loop has no more reason to stay alive, or `stop` is
    /// called.
    Default,
    /// Run exactly one iteration, blocking in the poll phase unless the loop
    /// would otherwise have nothing to wait for.
    Once,
    /// Run exactly one iteration with a zero timeout; never blocks.
    NoWait,
}

pub(crate) struct LoopInner {
    pub(crate) now: u64,
    epoch: Instant,
    stop_flag: bool,
    pub(crate) registry: Registry,
    pub(crate) requests: RequestRegistry,
    pub(crate) timers: TimerHeap,
    timer_counter: u64,
    pub(crate) poller: Box<dyn Poller>,
    pub(crate) notify_handle: evloop_driver::NotifyHandle,
    pending: Vec<evloop_driver::ReadyEvent>,
    pub(crate) work: WorkBridge,
}

impl LoopInner {
    pub(crate) fn next_timer_id(&mut self) -> u64 {
        self.timer_counter += 1;
        self.timer_counter
    }
}

/// A single-threaded event loop. Cheaply cloneable; every clone shares the
/// same underlying state, mirroring how a `uv_loop_t*` is passed around.
#[derive(Clone)]
pub struct Loop {
    pub(crate) inner: Rc<RefCell<LoopInner>>,
}

impl Loop {
    /// Initialize a loop with the default poller backend.
    pub fn new() -> Result<Self> {
        let poller = PollBackend::new().map_err(|_| Error::Invariant("failed to create poller backend"))?;
        Self::with_poller(Box::new(poller))
    }

    /// Initialize a loop with a caller-supplied poller backend. Exposed so
    /// embedders (an application already running its own reactor) can plug
    /// this loop's readiness source into theirs.
    pub fn with_poller(poller: Box<dyn Poller>) -> Result<Self> {
        let notify_handle = poller.notify_handle();
        let inner = LoopInner {
            now: 0,
            epoch: Instant::now(),
            stop_flag: false,
            registry: Registry::new(),
            requests: RequestRegistry::new(),
            timers: TimerHeap::new(),
            timer_counter: 0,
            poller,
            notify_handle,
            pending: Vec::new(),
            work: WorkBridge::new(0),
        };
        let loop_ = Loop {
            inner: Rc::new(RefCell::new(inner)),
        };
        loop_.update_time();

        // The threadpool completion watcher: an internal async handle,
        // unref'd immediately so the bridge alone never keeps the loop
        // alive.
        let loop_for_cb = loop_.clone();
        let completion_async = loop_.async_init(move |_| loop_for_cb.drain_work_completions());
        {
            let mut inner = loop_.inner.borrow_mut();
            inner.work.completion_async = completion_async;
            if let Some(rec) = inner.registry.get_mut(completion_async) {
                rec.flags.insert(crate::flags::HandleFlags::INTERNAL);
            }
        }
        loop_.unref(completion_async)?;
        Ok(loop_)
    }

    /// Snapshot the monotonic clock into `loop.now`. Guarantees monotonicity
    /// even if the OS clock hiccups, by never moving `now` backwards.
    pub fn update_time(&self) {
        let mut inner = self.inner.borrow_mut();
        let elapsed = inner.epoch.elapsed().as_millis() as u64;
        if elapsed > inner.now {
            inner.now = elapsed;
        }
    }

    /// The loop's current time snapshot, in milliseconds since the loop was
    /// created.
    pub fn now(&self) -> u64 {
        self.inner.borrow().now
    }

    /// Request that the loop stop after the current iteration's already
    /// started phases complete.
    pub fn stop(&self) {
        self.inner.borrow_mut().stop_flag = true;
    }

    pub fn ref_handle(&self, handle: HandleId) -> Result<()> {
        self.inner.borrow_mut().registry.set_ref(handle, true)
    }

    pub fn unref(&self, handle: HandleId) -> Result<()> {
        self.inner.borrow_mut().registry.set_ref(handle, false)
    }

    pub fn is_active(&self, handle: HandleId) -> bool {
        self.inner.borrow().registry.is_active(handle)
    }

    pub fn is_closing(&self, handle: HandleId) -> bool {
        self.inner.borrow().registry.is_closing(handle)
    }

    /// Number of handles keeping the loop alive (`ACTIVE ∧ REF ∧ ¬CLOSING`).
    pub fn active_handles(&self) -> usize {
        self.inner.borrow().registry.active_handles
    }

    pub fn active_requests(&self) -> usize {
        self.inner.borrow().requests.active_requests()
    }

    /// Close a handle. Always safe, always non-blocking, always defers `cb`
    /// to a later loop iteration.
    pub fn close(&self, handle: HandleId, cb: impl FnOnce(HandleId) + 'static) -> Result<()> {
        instrument!(evloop_log::Level::TRACE, "close", handle);
        self.release_backend_resources(handle)?;
        self.inner.borrow_mut().registry.begin_close(handle, Some(Box::new(cb)))
    }

    fn release_backend_resources(&self, handle: HandleId) -> Result<()> {
        let fd = {
            let inner = self.inner.borrow();
            match inner.registry.get(handle).map(|r| &r.kind) {
                Some(HandleKind::Tcp(s)) | Some(HandleKind::Pipe(s)) => Some(s.raw_fd()),
                Some(HandleKind::TcpListener(s)) => Some(s.raw_fd()),
                _ => None,
            }
        };
        let is_stream = matches!(
            self.inner.borrow().registry.get(handle).map(|r| &r.kind),
            Some(HandleKind::Tcp(_)) | Some(HandleKind::Pipe(_))
        );
        if is_stream {
            self.stream_flush_cancelled(handle);
        }
        if let Some(fd) = fd {
            let mut inner = self.inner.borrow_mut();
            let _ = inner.poller.delete(fd);
        }
        Ok(())
    }

    fn compute_timeout(&self) -> Option<Duration> {
        let inner = self.inner.borrow();
        let immediate = inner.stop_flag
            || (inner.registry.active_handles == 0 && inner.requests.active_requests() == 0 && inner.registry.closing.is_empty())
            || !inner.pending.is_empty()
            || !inner.registry.closing.is_empty()
            || inner
                .registry
                .slab
                .iter()
                .any(|(_, rec)| matches!(rec.kind, HandleKind::Idle(_)) && rec.flags.is_active());
        if immediate {
            return Some(Duration::ZERO);
        }
        drop(inner);
        match self.next_timer_deadline() {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }

    fn drain_pending(&self) -> bool {
        let events = {
            let mut inner = self.inner.borrow_mut();
            std::mem::take(&mut inner.pending)
        };
        let drained_any = !events.is_empty();
        for event in events {
            let handle = event.token;
            let kind_tag = {
                let inner = self.inner.borrow();
                match inner.registry.get(handle).map(|r| &r.kind) {
                    Some(HandleKind::Tcp(_)) | Some(HandleKind::Pipe(_)) => 1,
                    Some(HandleKind::TcpListener(_)) => 2,
                    _ => 0,
                }
            };
            match kind_tag {
                1 => self.stream_dispatch(handle, event.readable, event.writable),
                2 => self.tcp_listener_dispatch(handle),
                _ => {}
            }
        }
        drained_any
    }

    fn poll_phase(&self, timeout: Option<Duration>) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            let _ = inner.poller.wait(timeout, &mut events);
        }
        self.update_time();
        self.inner.borrow_mut().pending.extend(events);
    }

    fn liveness(&self) -> bool {
        let inner = self.inner.borrow();
        !inner.stop_flag
            && (inner.registry.active_handles > 0 || inner.requests.active_requests() > 0 || !inner.registry.closing.is_empty())
    }

    /// Run one iteration of the ten phases described in the module docs. Returns whether any
    /// pending I/O was drained in step 3 (used by `ONCE`'s progress rule).
    fn run_iteration(&self, mode: RunMode) -> bool {
        self.update_time();
        self.run_timers();
        let drained = self.drain_pending();
        self.run_idle_phase();
        self.run_prepare_phase();
        let timeout = match mode {
            RunMode::NoWait => Some(Duration::ZERO),
            _ => self.compute_timeout(),
        };
        self.poll_phase(timeout);
        self.run_check_phase();
        self.run_async_phase();
        self.inner.borrow_mut().registry.run_close_phase();
        if mode == RunMode::Once && !drained {
            self.run_timers();
        }
        drained
    }

    /// Drive the loop according to `mode`. Returns whether the loop still
    /// has outstanding work (mirrors libuv's `uv_run` return value: nonzero
    /// means "call me again").
    pub fn run(&self, mode: RunMode) -> bool {
        instrument!(evloop_log::Level::TRACE, "run", ?mode);
        match mode {
            RunMode::Default => {
                while self.liveness() {
                    self.run_iteration(RunMode::Default);
                }
            }
            RunMode::Once | RunMode::NoWait => {
                self.run_iteration(mode);
            }
        }
        self.liveness()
    }
}
