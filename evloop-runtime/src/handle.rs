//! The handle registry: per-loop storage, the flags state machine, and the
//! variant-specific state every handle kind carries.
//!
//! Handles live in a [`slab::Slab`] owned by the loop; a [`HandleId`] is a
//! stable index into it. There is deliberately no virtual dispatch: the
//! loop's phase walkers scan the slab and match on [`HandleKind`] directly,
//! per the "tagged variant, no hot-path vtable" design note.

use slab::Slab;

use crate::{
    error::{Error, Result},
    flags::HandleFlags,
    list::{Link, Linked, List},
};

pub type HandleId = usize;

/// User-supplied close callback. Bound with whatever state the caller's
/// closure needs to capture (typically an `Rc<RefCell<..>>` to shared app
/// state, per the single-threaded ownership style this crate uses
/// throughout).
pub type CloseCallback = Box<dyn FnOnce(HandleId)>;

/// State specific to timer handles. See [`crate::timer`].
#[derive(Default)]
pub struct TimerState {
    pub due: u64,
    pub repeat: u64,
    pub start_id: u64,
    pub callback: Option<Box<dyn FnMut(HandleId)>>,
}

/// State shared by the no-argument phase handles: idle, prepare, check.
#[derive(Default)]
pub struct PhaseState {
    pub callback: Option<Box<dyn FnMut(HandleId)>>,
}

/// State for the cross-thread wakeup handle. See [`crate::async_handle`].
pub struct AsyncState {
    pub pending: std::sync::Arc<std::sync::atomic::AtomicBool>,
    pub callback: Option<Box<dyn FnMut(HandleId)>>,
}

/// Lifecycle-only placeholder for handle kinds whose concrete OS backend
/// (UDP socket, TTY mode switch, process spawn/wait, signal delivery,
/// filesystem watching) is outside this crate: `init`/`start`/`stop`/`close`
/// all behave correctly, but no OS resource is ever actually armed.
#[derive(Default)]
pub struct StubState;

/// Which concrete kind a handle is, carrying that kind's private state.
pub enum HandleKind {
    Timer(TimerState),
    Prepare(PhaseState),
    Check(PhaseState),
    Idle(PhaseState),
    Async(AsyncState),
    Tcp(crate::stream::StreamState),
    Pipe(crate::stream::StreamState),
    /// A bound, listening (not yet accepted) TCP socket. Distinct from
    /// `Tcp` because a listener has no read/write state machine of its
    /// own — only `accept`.
    TcpListener(crate::net::tcp::ListenerState),
    Udp(StubState),
    Tty(StubState),
    Process(StubState),
    Signal(StubState),
    FsEvent(StubState),
    FsPoll(StubState),
}

impl HandleKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandleKind::Timer(_) => "timer",
            HandleKind::Prepare(_) => "prepare",
            HandleKind::Check(_) => "check",
            HandleKind::Idle(_) => "idle",
            HandleKind::Async(_) => "async",
            HandleKind::Tcp(_) => "tcp",
            HandleKind::Pipe(_) => "pipe",
            HandleKind::TcpListener(_) => "tcp_listener",
            HandleKind::Udp(_) => "udp",
            HandleKind::Tty(_) => "tty",
            HandleKind::Process(_) => "process",
            HandleKind::Signal(_) => "signal",
            HandleKind::FsEvent(_) => "fs_event",
            HandleKind::FsPoll(_) => "fs_poll",
        }
    }
}

/// One entry in the handle registry.
pub struct HandleRecord {
    pub flags: HandleFlags,
    pub kind: HandleKind,
    pub close_cb: Option<CloseCallback>,
    closing_link: Link,
}

impl Linked for HandleRecord {
    fn link(&self) -> &Link {
        &self.closing_link
    }
    fn link_mut(&mut self) -> &mut Link {
        &mut self.closing_link
    }
}

/// Per-loop handle storage plus the bookkeeping the flags-table in the
/// design requires (active-handle count, closing list).
#[derive(Default)]
pub struct Registry {
    pub slab: Slab<HandleRecord>,
    pub closing: List,
    pub active_handles: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, inactive, `REF`-set handle. Mirrors `<type>_init`.
    pub fn init(&mut self, kind: HandleKind) -> HandleId {
        self.slab.insert(HandleRecord {
            flags: HandleFlags::new_default(),
            kind,
            close_cb: None,
            closing_link: Link::default(),
        })
    }

    pub fn get(&self, id: HandleId) -> Option<&HandleRecord> {
        self.slab.get(id)
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut HandleRecord> {
        self.slab.get_mut(id)
    }

    /// Set `ACTIVE`, adjusting `active_handles` if the handle is `REF`'d and
    /// wasn't already counted.
    pub fn start(&mut self, id: HandleId) -> Result<()> {
        let rec = self.slab.get_mut(id).ok_or(Error::InvalidArgument)?;
        if rec.flags.is_closing() {
            return Err(Error::InvalidArgument);
        }
        let was_counted = rec.flags.keeps_loop_alive();
        rec.flags.insert(HandleFlags::ACTIVE);
        if rec.flags.keeps_loop_alive() && !was_counted {
            self.active_handles += 1;
        }
        Ok(())
    }

    /// Clear `ACTIVE`, adjusting `active_handles` if it was counted.
    pub fn stop(&mut self, id: HandleId) -> Result<()> {
        let rec = self.slab.get_mut(id).ok_or(Error::InvalidArgument)?;
        if rec.flags.is_closing() {
            return Ok(());
        }
        let was_counted = rec.flags.keeps_loop_alive();
        rec.flags.remove(HandleFlags::ACTIVE);
        if was_counted {
            self.active_handles -= 1;
        }
        Ok(())
    }

    pub fn set_ref(&mut self, id: HandleId, want_ref: bool) -> Result<()> {
        let rec = self.slab.get_mut(id).ok_or(Error::InvalidArgument)?;
        let was_counted = rec.flags.keeps_loop_alive();
        rec.flags.set(HandleFlags::REF, want_ref);
        let now_counted = rec.flags.keeps_loop_alive();
        if now_counted && !was_counted {
            self.active_handles += 1;
        } else if was_counted && !now_counted {
            self.active_handles -= 1;
        }
        Ok(())
    }

    pub fn is_active(&self, id: HandleId) -> bool {
        self.slab.get(id).map(|r| r.flags.is_active()).unwrap_or(false)
    }

    pub fn is_closing(&self, id: HandleId) -> bool {
        self.slab.get(id).map(|r| r.flags.is_closing()).unwrap_or(true)
    }

    /// Mark `CLOSING`, clear `ACTIVE`, and chain the handle onto the closing
    /// list. The caller is responsible for releasing any backend resource
    /// (unarming the poller, etc.) before or after this call; the close
    /// callback itself is deferred to the loop's close phase.
    pub fn begin_close(&mut self, id: HandleId, cb: Option<CloseCallback>) -> Result<()> {
        {
            let rec = self.slab.get(id).ok_or(Error::InvalidArgument)?;
            if rec.flags.is_closing() || rec.flags.is_closed() {
                return Err(Error::AlreadyInUse);
            }
        }
        self.stop(id)?;
        let rec = self.slab.get_mut(id).unwrap();
        rec.flags.insert(HandleFlags::CLOSING);
        rec.close_cb = cb;
        self.closing.push_back(&mut self.slab, id);
        Ok(())
    }

    /// Drain the closing list, invoking each handle's close callback exactly
    /// once and then marking it `CLOSED`. Run once per loop iteration
    /// (phase 9).
    pub fn run_close_phase(&mut self) -> usize {
        let mut fired = 0;
        let mut pending: Vec<(HandleId, Option<CloseCallback>)> = Vec::new();
        self.closing.for_each(&mut self.slab, |slab, id| {
            let cb = slab[id].close_cb.take();
            pending.push((id, cb));
        });
        self.closing = List::new();
        for (id, cb) in pending {
            if let Some(rec) = self.slab.get_mut(id) {
                rec.flags.remove(HandleFlags::CLOSING);
                rec.flags.insert(HandleFlags::CLOSED);
            }
            if let Some(cb) = cb {
                cb(id);
                fired += 1;
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle(reg: &mut Registry) -> HandleId {
        reg.init(HandleKind::Idle(PhaseState::default()))
    }

    #[test]
    fn start_stop_toggles_active_handles() {
        let mut reg = Registry::new();
        let h = idle(&mut reg);
        assert_eq!(reg.active_handles, 0);
        reg.start(h).unwrap();
        assert_eq!(reg.active_handles, 1);
        reg.stop(h).unwrap();
        assert_eq!(reg.active_handles, 0);
    }

    #[test]
    fn start_is_idempotent() {
        let mut reg = Registry::new();
        let h = idle(&mut reg);
        reg.start(h).unwrap();
        reg.start(h).unwrap();
        assert_eq!(reg.active_handles, 1);
    }

    #[test]
    fn unref_excludes_from_active_count() {
        let mut reg = Registry::new();
        let h = idle(&mut reg);
        reg.start(h).unwrap();
        reg.set_ref(h, false).unwrap();
        assert_eq!(reg.active_handles, 0);
        reg.set_ref(h, true).unwrap();
        assert_eq!(reg.active_handles, 1);
    }

    #[test]
    fn close_fires_callback_exactly_once() {
        let mut reg = Registry::new();
        let h = idle(&mut reg);
        reg.start(h).unwrap();
        let fired = std::rc::Rc::new(std::cell::Cell::new(0));
        let fired2 = fired.clone();
        reg.begin_close(h, Some(Box::new(move |_| fired2.set(fired2.get() + 1))))
            .unwrap();
        assert_eq!(reg.active_handles, 0);
        assert_eq!(reg.run_close_phase(), 1);
        assert_eq!(fired.get(), 1);
        assert_eq!(reg.run_close_phase(), 0);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn double_close_is_rejected() {
        let mut reg = Registry::new();
        let h = idle(&mut reg);
        reg.begin_close(h, None).unwrap();
        assert_eq!(reg.begin_close(h, None), Err(Error::AlreadyInUse));
    }
}
