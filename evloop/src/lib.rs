//! A cross-platform asynchronous I/O event loop: applications register
//! interest in I/O readiness, timers, and blocking work; the loop drives
//! these to completion and invokes callbacks on its own thread.
//!
//! This crate is a thin facade over its component crates:
//! - [`evloop_driver`] — the readiness poller adapter.
//! - [`evloop_threadpool`] — the fixed worker pool backing [`queue_work`].
//! - [`evloop_runtime`] — handles, requests, timers, streams, the loop
//!   driver itself.
//!
//! ```no_run
//! use evloop::{Loop, RunMode};
//!
//! let lp = Loop::new().unwrap();
//! let timer = lp.timer_init();
//! lp.timer_start(timer, 50, 0, |_| println!("fired")).unwrap();
//! lp.run(RunMode::Default);
//! ```

#![warn(missing_docs)]

pub use evloop_driver::{Interest, NotifyHandle, PollBackend, Poller, ReadyEvent};
pub use evloop_runtime::{net, AsyncSender, Error, HandleId, Loop, ReadResult, Result, RunMode, WorkId, WorkStatus};
pub use evloop_threadpool::{CancelOutcome, ThreadPool, WorkId as PoolWorkId, THREADPOOL_SIZE_VAR};
