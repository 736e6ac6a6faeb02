//! Platform-agnostic readiness poller.
//!
//! This crate is the *Poller* collaborator described by the event loop: an
//! abstract readiness/completion source that the loop drives with a
//! timeout-bounded wait and that translates OS events into per-request
//! deliveries. The concrete backend here is a reactor built on the
//! cross-platform `polling` crate (epoll / kqueue / IOCP under the hood);
//! nothing above this crate needs to know which one.

#![warn(missing_docs)]

mod interest;
mod notify;
mod poll_backend;

pub use interest::Interest;
pub use notify::NotifyHandle;
pub use poll_backend::PollBackend;

use std::{io, time::Duration};

#[cfg(unix)]
pub use std::os::fd::RawFd;
#[cfg(windows)]
pub use std::os::windows::io::RawSocket as RawFd;

/// One readiness delivery produced by a [`Poller::wait`] call.
///
/// `token` is whatever the caller passed to [`Poller::add`]/[`Poller::modify`]
/// for this fd; the event loop uses it as the handle or request id to route
/// the delivery to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    /// The id the registrant associated with this fd.
    pub token: usize,
    /// The fd became readable.
    pub readable: bool,
    /// The fd became writable.
    pub writable: bool,
}

/// Abstract readiness/completion source consumed by the event loop.
///
/// Implementations may be reactor (readiness, e.g. epoll/kqueue) or proactor
/// (completion, e.g. IOCP) in spirit; the loop treats them uniformly through
/// this trait. Every returned event identifies the owner to be moved to the
/// loop's pending queue.
pub trait Poller {
    /// Register interest in `fd`, tagged with `token`.
    fn add(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;

    /// Change the registered interest for `fd`.
    fn modify(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;

    /// Stop watching `fd` entirely.
    fn delete(&mut self, fd: RawFd) -> io::Result<()>;

    /// Block up to `timeout` (`None` = indefinite) collecting ready events
    /// into `out`. A `timeout` of `Some(Duration::ZERO)` polls without
    /// blocking. Must return promptly when [`NotifyHandle::notify`] is called
    /// from another thread, even with no real events ready.
    fn wait(&mut self, timeout: Option<Duration>, out: &mut Vec<ReadyEvent>) -> io::Result<()>;

    /// A handle that can wake a blocked [`Poller::wait`] from any thread.
    fn notify_handle(&self) -> NotifyHandle;

    /// The backend's own pollable fd, for loops embedded in another poller.
    fn backend_fd(&self) -> Option<RawFd> {
        None
    }
}
