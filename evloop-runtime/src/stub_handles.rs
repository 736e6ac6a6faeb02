//! Lifecycle-only handle kinds.
//!
//! UDP, TTY, process, signal, filesystem-event, and filesystem-poll watching
//! each need a concrete OS backend (a UDP socket, a TTY mode switch, `fork`
//! /`exec`/`waitpid`, `signalfd`/`sigaction`, `inotify`/`kqueue`/`ReadDirectoryChangesW`)
//! that this crate's scope does not cover. What *is* in scope — and what
//! these provide — is the shared handle lifecycle: `init`/`start`/`stop`
//! /`ref`/`unref`/`close` all behave correctly and participate in
//! `active_handles` accounting exactly like every other handle kind; no OS
//! resource is ever armed.

use evloop_log::instrument;

use crate::{
    error::Result,
    handle::{HandleId, HandleKind, StubState},
    loop_core::Loop,
};

macro_rules! stub_handle_api {
    ($init:ident, $start:ident, $stop:ident, $variant:ident) => {
        impl Loop {
            #[doc = concat!("Register a new, inactive ", stringify!($variant), " handle. Lifecycle-only: see module docs.")]
            pub fn $init(&self) -> HandleId {
                self.inner.borrow_mut().registry.init(HandleKind::$variant(StubState))
            }

            #[doc = concat!("Mark the ", stringify!($variant), " handle active. No OS resource is armed.")]
            pub fn $start(&self, handle: HandleId) -> Result<()> {
                instrument!(evloop_log::Level::TRACE, stringify!($start), handle);
                self.inner.borrow_mut().registry.start(handle)
            }

            pub fn $stop(&self, handle: HandleId) -> Result<()> {
                self.inner.borrow_mut().registry.stop(handle)
            }
        }
    };
}

stub_handle_api!(udp_init, udp_start, udp_stop, Udp);
stub_handle_api!(tty_init, tty_start, tty_stop, Tty);

#[cfg(feature = "process")]
stub_handle_api!(process_init, process_start, process_stop, Process);

#[cfg(feature = "signal")]
stub_handle_api!(signal_init, signal_start, signal_stop, Signal);

#[cfg(feature = "fs-event")]
stub_handle_api!(fs_event_init, fs_event_start, fs_event_stop, FsEvent);

#[cfg(feature = "fs-poll")]
stub_handle_api!(fs_poll_init, fs_poll_start, fs_poll_stop, FsPoll);
