use std::{
    collections::HashMap,
    io,
    num::NonZeroUsize,
    sync::Arc,
    time::Duration,
};

use evloop_log::{instrument, trace};
use polling::{Event, Events, Poller as RawPoller};

use crate::{Interest, NotifyHandle, Poller, RawFd, ReadyEvent};

struct Registration {
    token: usize,
    interest: Interest,
}

/// Default [`Poller`] backend, built on the cross-platform `polling` crate
/// (epoll on Linux, kqueue on BSD/macOS, IOCP on Windows).
pub struct PollBackend {
    poller: Arc<RawPoller>,
    events: Events,
    registry: HashMap<RawFd, Registration>,
}

impl PollBackend {
    /// Create a backend with the default event batch capacity.
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(1024)
    }

    /// Create a backend whose event batch holds up to `capacity` entries
    /// before a `wait` call needs more than one pass.
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        let events = match NonZeroUsize::new(capacity) {
            Some(cap) => Events::with_capacity(cap),
            None => Events::new(),
        };
        Ok(Self {
            poller: Arc::new(RawPoller::new()?),
            events,
            registry: HashMap::new(),
        })
    }

    fn event_for(interest: Interest, token: usize) -> Event {
        let mut event = Event::none(token);
        event.readable = interest.readable;
        event.writable = interest.writable;
        event
    }
}

impl Poller for PollBackend {
    fn add(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        instrument!(evloop_log::Level::TRACE, "add", ?fd, token);
        // SAFETY: caller guarantees `fd` stays registered until `delete` is
        // called for it.
        unsafe {
            self.poller.add(fd, Self::event_for(interest, token))?;
        }
        self.registry.insert(fd, Registration { token, interest });
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        instrument!(evloop_log::Level::TRACE, "modify", ?fd, token);
        #[cfg(unix)]
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        #[cfg(windows)]
        let borrowed = unsafe { std::os::windows::io::BorrowedSocket::borrow_raw(fd) };
        self.poller.modify(borrowed, Self::event_for(interest, token))?;
        self.registry.insert(fd, Registration { token, interest });
        Ok(())
    }

    fn delete(&mut self, fd: RawFd) -> io::Result<()> {
        instrument!(evloop_log::Level::TRACE, "delete", ?fd);
        if self.registry.remove(&fd).is_none() {
            return Ok(());
        }
        #[cfg(unix)]
        let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
        #[cfg(windows)]
        let borrowed = unsafe { std::os::windows::io::BorrowedSocket::borrow_raw(fd) };
        self.poller.delete(borrowed)
    }

    fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<ReadyEvent>) -> io::Result<()> {
        instrument!(evloop_log::Level::TRACE, "wait", ?timeout);
        self.events.clear();
        self.poller.wait(&mut self.events, timeout)?;
        for event in self.events.iter() {
            trace!("ready {:?}", event.key);
            out.push(ReadyEvent {
                token: event.key,
                readable: event.readable,
                writable: event.writable,
            });
        }
        Ok(())
    }

    fn notify_handle(&self) -> NotifyHandle {
        NotifyHandle::new(self.poller.clone())
    }
}

impl Drop for PollBackend {
    fn drop(&mut self) {
        for fd in self.registry.keys() {
            #[cfg(unix)]
            let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(*fd) };
            #[cfg(windows)]
            let borrowed = unsafe { std::os::windows::io::BorrowedSocket::borrow_raw(*fd) };
            let _ = self.poller.delete(borrowed);
        }
    }
}
