//! Timer handle operations: `start`, `stop`, `again`, repeat accessors, and
//! the dispatch routine the loop driver calls each iteration.

use evloop_log::instrument;

use crate::{
    error::{Error, Result},
    handle::{HandleId, HandleKind, TimerState},
    loop_core::Loop,
    timer_heap::TimerEntry,
};

impl Loop {
    /// Register a new, inactive timer handle.
    pub fn timer_init(&self) -> HandleId {
        self.inner.borrow_mut().registry.init(HandleKind::Timer(TimerState::default()))
    }

    /// Arm `handle`, invoking `callback` after `timeout_ms`, and every
    /// `repeat_ms` thereafter if non-zero. Restarting an already-armed timer
    /// stops it first.
    pub fn timer_start(
        &self,
        handle: HandleId,
        timeout_ms: u64,
        repeat_ms: u64,
        callback: impl FnMut(HandleId) + 'static,
    ) -> Result<()> {
        instrument!(evloop_log::Level::TRACE, "timer_start", handle, timeout_ms, repeat_ms);
        if self.timer_is_active(handle)? {
            self.timer_stop(handle)?;
        }
        let mut inner = self.inner.borrow_mut();
        let now = inner.now;
        let start_id = inner.next_timer_id();
        let due = now + timeout_ms;
        {
            let rec = inner.registry.get_mut(handle).ok_or(Error::InvalidArgument)?;
            let state = match &mut rec.kind {
                HandleKind::Timer(s) => s,
                _ => return Err(Error::InvalidArgument),
            };
            state.due = due;
            state.repeat = repeat_ms;
            state.start_id = start_id;
            state.callback = Some(Box::new(callback));
        }
        inner.timers.push(TimerEntry { due, start_id, handle });
        inner.registry.start(handle)?;
        Ok(())
    }

    /// Disarm a timer. Idempotent; the heap entry becomes a tombstone,
    /// discarded lazily when it would otherwise surface at the root.
    pub fn timer_stop(&self, handle: HandleId) -> Result<()> {
        instrument!(evloop_log::Level::TRACE, "timer_stop", handle);
        self.inner.borrow_mut().registry.stop(handle)
    }

    /// If `handle` is active: stop if `repeat == 0`, else restart with
    /// `timeout = repeat`.
    pub fn timer_again(&self, handle: HandleId) -> Result<()> {
        let repeat = {
            let inner = self.inner.borrow();
            if !inner.registry.is_active(handle) {
                return Err(Error::InvalidArgument);
            }
            match &inner.registry.get(handle).ok_or(Error::InvalidArgument)?.kind {
                HandleKind::Timer(s) => s.repeat,
                _ => return Err(Error::InvalidArgument),
            }
        };
        if repeat == 0 {
            self.timer_stop(handle)
        } else {
            let cb = {
                let mut inner = self.inner.borrow_mut();
                match &mut inner.registry.get_mut(handle).unwrap().kind {
                    HandleKind::Timer(s) => s.callback.take(),
                    _ => None,
                }
            };
            let cb = cb.ok_or(Error::Invariant("timer_again: active timer missing callback"))?;
            self.timer_start(handle, repeat, repeat, cb)
        }
    }

    pub fn timer_get_repeat(&self, handle: HandleId) -> Result<u64> {
        let inner = self.inner.borrow();
        match &inner.registry.get(handle).ok_or(Error::InvalidArgument)?.kind {
            HandleKind::Timer(s) => Ok(s.repeat),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Set the repeat interval. Takes effect on the *next* scheduled
    /// expiry; never shortens an outstanding one.
    pub fn timer_set_repeat(&self, handle: HandleId, repeat_ms: u64) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        match &mut inner.registry.get_mut(handle).ok_or(Error::InvalidArgument)?.kind {
            HandleKind::Timer(s) => {
                s.repeat = repeat_ms;
                Ok(())
            }
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Milliseconds until `handle` next fires, or `None` if inactive.
    pub fn timer_get_due_in(&self, handle: HandleId) -> Option<u64> {
        let inner = self.inner.borrow();
        if !inner.registry.is_active(handle) {
            return None;
        }
        match &inner.registry.get(handle)?.kind {
            HandleKind::Timer(s) => Some(s.due.saturating_sub(inner.now)),
            _ => None,
        }
    }

    fn timer_is_active(&self, handle: HandleId) -> Result<bool> {
        Ok(self.inner.borrow().registry.is_active(handle))
    }

    /// Dispatch every timer due at or before `loop.now`. Re-peeks the heap
    /// root after each firing so mid-dispatch mutation (a callback that
    /// restarts or closes a timer) is tolerated.
    pub(crate) fn run_timers(&self) {
        loop {
            let due_entry = {
                let inner = self.inner.borrow();
                match inner.timers.peek() {
                    Some(e) if e.due <= inner.now => Some(*e),
                    _ => None,
                }
            };
            let Some(entry) = due_entry else { break };
            {
                let mut inner = self.inner.borrow_mut();
                inner.timers.pop();
            }
            // Tombstone check: the heap entry is stale if the timer isn't
            // active or has since been restarted with a different start_id.
            let (is_live, repeat) = {
                let inner = self.inner.borrow();
                match inner.registry.get(entry.handle) {
                    Some(rec) if rec.flags.is_active() => match &rec.kind {
                        HandleKind::Timer(s) if s.start_id == entry.start_id => (true, s.repeat),
                        _ => (false, 0),
                    },
                    _ => (false, 0),
                }
            };
            if !is_live {
                continue;
            }
            if repeat > 0 {
                let mut inner = self.inner.borrow_mut();
                let now = inner.now;
                let due = now + repeat;
                if let Some(rec) = inner.registry.get_mut(entry.handle) {
                    if let HandleKind::Timer(s) = &mut rec.kind {
                        s.due = due;
                    }
                }
                inner.timers.push(TimerEntry { due, start_id: entry.start_id, handle: entry.handle });
            } else {
                let mut inner = self.inner.borrow_mut();
                let _ = inner.registry.stop(entry.handle);
            }
            let cb = {
                let mut inner = self.inner.borrow_mut();
                match inner.registry.get_mut(entry.handle) {
                    Some(rec) => match &mut rec.kind {
                        HandleKind::Timer(s) => s.callback.take(),
                        _ => None,
                    },
                    None => None,
                }
            };
            if let Some(mut cb) = cb {
                cb(entry.handle);
                let mut inner = self.inner.borrow_mut();
                if let Some(rec) = inner.registry.get_mut(entry.handle) {
                    if let HandleKind::Timer(s) = &mut rec.kind {
                        if s.callback.is_none() {
                            s.callback = Some(cb);
                        }
                    }
                }
            }
        }
    }

    /// `max(0, root.due - now)` if a timer is armed and live, else `None`.
    pub(crate) fn next_timer_deadline(&self) -> Option<u64> {
        let inner = self.inner.borrow();
        inner.timers.peek().map(|e| e.due.saturating_sub(inner.now))
    }
}
